//! End-to-end pipeline test: compressed channel bytes through decode,
//! assembly and compositing, driven through the public engine API on the
//! deterministic CPU path.

use std::collections::HashMap;
use std::io::Write;

use flate2::Compression as ZlibLevel;
use flate2::write::ZlibEncoder;

use psdview::decode::packbits;
use psdview::document::{
    BitDepth, BoundRect, ChannelInfo, ColorMode, Document, LayerNode, LayerProps,
};
use psdview::{BlendMode, DecodeError, DocumentSource, ViewerEngine};

const DOC: u32 = 64;
const HALF: i32 = 32;

/// In-memory document source with pre-built compressed channel streams.
struct TestSource {
    document: Document,
    /// (layer index, channel position) -> compressed bytes
    channels: HashMap<(usize, usize), Vec<u8>>,
}

impl DocumentSource for TestSource {
    fn document(&self) -> &Document {
        &self.document
    }

    fn channel_bytes(&self, layer: usize, channel: usize) -> Result<Vec<u8>, DecodeError> {
        self.channels
            .get(&(layer, channel))
            .cloned()
            .ok_or(DecodeError::TruncatedInput { expected: 1, got: 0 })
    }
}

fn rle_compress(plane: &[u8], width: usize, rows: usize) -> Vec<u8> {
    let mut streams = Vec::with_capacity(rows);
    for row in plane.chunks_exact(width) {
        streams.push(packbits::encode_scanline(row));
    }
    let mut out = Vec::new();
    for s in &streams {
        out.extend_from_slice(&(s.len() as u16).to_be_bytes());
    }
    for s in &streams {
        out.extend_from_slice(s);
    }
    out
}

fn zlib_compress(plane: &[u8]) -> Vec<u8> {
    let mut enc = ZlibEncoder::new(Vec::new(), ZlibLevel::default());
    enc.write_all(plane).unwrap();
    enc.finish().unwrap()
}

/// One 32x32 solid layer with R/G/B channels at the given compression tag.
fn solid_layer(
    index: usize,
    name: &str,
    bounds: BoundRect,
    rgb: [u8; 3],
    compression: u16,
    channels_out: &mut HashMap<(usize, usize), Vec<u8>>,
) -> LayerNode {
    let w = bounds.width() as usize;
    let h = bounds.height() as usize;
    let mut infos = Vec::new();
    for (pos, (id, value)) in [(0i16, rgb[0]), (1, rgb[1]), (2, rgb[2])].into_iter().enumerate() {
        let plane = vec![value; w * h];
        let bytes = match compression {
            0 => plane,
            1 => rle_compress(&plane, w, h),
            2 => zlib_compress(&plane),
            _ => unreachable!("unused tag in fixture"),
        };
        infos.push(ChannelInfo { id, compression, byte_len: bytes.len() as u64 });
        channels_out.insert((index, pos), bytes);
    }
    LayerNode::Layer(LayerProps {
        index,
        name: name.into(),
        blend_mode: BlendMode::Normal,
        opacity: 255,
        visible: true,
        clipping: false,
        bounds,
        channels: infos,
    })
}

/// Three solid quadrants, each channel set exercising a different
/// compression path: raw, RLE and zip.
fn three_quadrant_source() -> TestSource {
    let mut channels = HashMap::new();
    let red = solid_layer(
        0,
        "Red",
        BoundRect::new(0, 0, HALF, HALF),
        [255, 0, 0],
        0,
        &mut channels,
    );
    let green = solid_layer(
        1,
        "Green",
        BoundRect::new(0, HALF, HALF, HALF * 2),
        [0, 255, 0],
        1,
        &mut channels,
    );
    let blue = solid_layer(
        2,
        "Blue",
        BoundRect::new(HALF, 0, HALF * 2, HALF),
        [0, 0, 255],
        2,
        &mut channels,
    );

    TestSource {
        document: Document {
            width: DOC,
            height: DOC,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            root: LayerNode::Root { children: vec![red, green, blue] },
        },
        channels,
    }
}

fn wait_for_decodes(engine: &mut ViewerEngine) {
    for _ in 0..400 {
        engine.poll_decodes();
        if !engine.decodes_pending() {
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(5));
    }
    panic!("decodes did not finish");
}

fn pixel(rgba: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * DOC + x) * 4) as usize;
    [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
}

#[test]
fn three_quadrants_decode_and_composite() {
    let source = three_quadrant_source();
    let mut engine = ViewerEngine::without_gpu();
    engine.resize(DOC as f32, DOC as f32, 1.0);
    engine.load_document(&source).unwrap();
    wait_for_decodes(&mut engine);

    let out = engine.composite_rgba().unwrap().expect("composite exists");
    assert_eq!(out.len(), (DOC * DOC * 4) as usize);

    // Raw-compressed red, RLE green, zip blue, each in its quadrant.
    assert_eq!(pixel(&out, 10, 10), [255, 0, 0, 255]);
    assert_eq!(pixel(&out, 40, 10), [0, 255, 0, 255]);
    assert_eq!(pixel(&out, 10, 40), [0, 0, 255, 255]);
    // Fourth quadrant has no layer: transparent.
    assert_eq!(pixel(&out, 40, 40), [0, 0, 0, 0]);
}

#[test]
fn dragging_a_layer_shifts_its_quadrant() {
    let source = three_quadrant_source();
    let mut engine = ViewerEngine::without_gpu();
    engine.resize(DOC as f32, DOC as f32, 1.0);
    engine.load_document(&source).unwrap();
    wait_for_decodes(&mut engine);

    engine.set_layer_offset(0, 32.0, 32.0);
    let out = engine.composite_rgba().unwrap().expect("composite exists");

    // Red moved to the bottom-right quadrant; its old spot is empty.
    assert_eq!(pixel(&out, 40, 40), [255, 0, 0, 255]);
    assert_eq!(pixel(&out, 10, 10), [0, 0, 0, 0]);
}

#[test]
fn hidden_group_excludes_descendants_from_composite() {
    let mut channels = HashMap::new();
    let inside = solid_layer(
        0,
        "Inside",
        BoundRect::new(0, 0, HALF, HALF),
        [255, 0, 0],
        0,
        &mut channels,
    );
    let outside = solid_layer(
        1,
        "Outside",
        BoundRect::new(0, HALF, HALF, HALF * 2),
        [0, 255, 0],
        1,
        &mut channels,
    );
    let source = TestSource {
        document: Document {
            width: DOC,
            height: DOC,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            root: LayerNode::Root {
                children: vec![
                    LayerNode::Group {
                        index: 10,
                        name: "hidden".into(),
                        visible: false,
                        children: vec![inside],
                    },
                    outside,
                ],
            },
        },
        channels,
    };

    let mut engine = ViewerEngine::without_gpu();
    engine.resize(DOC as f32, DOC as f32, 1.0);
    engine.load_document(&source).unwrap();
    wait_for_decodes(&mut engine);

    let out = engine.composite_rgba().unwrap().expect("composite exists");
    // The layer inside the hidden group decoded but must not composite.
    assert_eq!(pixel(&out, 10, 10), [0, 0, 0, 0]);
    assert_eq!(pixel(&out, 40, 10), [0, 255, 0, 255]);
}

#[test]
fn multiply_layer_darkens_the_one_below() {
    let mut channels = HashMap::new();
    let base = solid_layer(
        0,
        "Base",
        BoundRect::new(0, 0, HALF, HALF),
        [200, 200, 200],
        0,
        &mut channels,
    );
    let mut top = solid_layer(
        1,
        "Top",
        BoundRect::new(0, 0, HALF, HALF),
        [128, 128, 128],
        0,
        &mut channels,
    );
    if let LayerNode::Layer(props) = &mut top {
        props.blend_mode = BlendMode::Multiply;
    }

    let source = TestSource {
        document: Document {
            width: DOC,
            height: DOC,
            depth: BitDepth::Eight,
            color_mode: ColorMode::Rgb,
            large_format: false,
            // Tree order is top-to-bottom: Top above Base.
            root: LayerNode::Root { children: vec![top, base] },
        },
        channels,
    };

    let mut engine = ViewerEngine::without_gpu();
    engine.resize(DOC as f32, DOC as f32, 1.0);
    engine.load_document(&source).unwrap();
    wait_for_decodes(&mut engine);

    let out = engine.composite_rgba().unwrap().expect("composite exists");
    let px = pixel(&out, 10, 10);
    // 200/255 * 128/255 * 255 ≈ 100
    assert!(px[0] > 90 && px[0] < 110, "got {:?}", px);
    assert_eq!(px[3], 255);
}
