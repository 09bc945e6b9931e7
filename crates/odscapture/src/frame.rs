//! Captured image types: single faces, per-eye cubic frames, stereo pairs.

use std::fmt;

/// One RGBA8 texel as read back from a render target.
pub type Rgba8 = [u8; 4];

/// The six axis-aligned capture directions.
///
/// The ordinal is what the ODS shader receives through its `direction`
/// uniform, so the order is part of the shader contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CubeFace {
    Left,
    Right,
    Front,
    Back,
    Top,
    Bottom,
}

impl CubeFace {
    pub const ALL: [CubeFace; 6] = [
        CubeFace::Left,
        CubeFace::Right,
        CubeFace::Front,
        CubeFace::Back,
        CubeFace::Top,
        CubeFace::Bottom,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn from_ordinal(ordinal: usize) -> Option<Self> {
        Self::ALL.get(ordinal).copied()
    }
}

impl fmt::Display for CubeFace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CubeFace::Left => "left",
            CubeFace::Right => "right",
            CubeFace::Front => "front",
            CubeFace::Back => "back",
            CubeFace::Top => "top",
            CubeFace::Bottom => "bottom",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left,
    Right,
}

impl Eye {
    pub fn other(self) -> Self {
        match self {
            Eye::Left => Eye::Right,
            Eye::Right => Eye::Left,
        }
    }
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("left"),
            Eye::Right => f.write_str("right"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("expected the {expected} face at slot {slot}, found the {found} face")]
    FaceOrder {
        slot: usize,
        expected: CubeFace,
        found: CubeFace,
    },
    #[error("{face} face belongs to the {found} eye, expected the {expected} eye")]
    EyeMismatch {
        face: CubeFace,
        expected: Eye,
        found: Eye,
    },
    #[error("faces from frames {expected} and {found} cannot be combined")]
    FrameMismatch { expected: u32, found: u32 },
    #[error("{face} face is {width}x{height}, expected {expected_width}x{expected_height}")]
    SizeMismatch {
        face: CubeFace,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error("{pixels} pixels do not fill a {width}x{height} image")]
    PixelCount { width: u32, height: u32, pixels: usize },
}

/// One rendered cube face for one eye.
///
/// Owns its host pixel memory; dropping the image releases it.
#[derive(Clone, PartialEq, Eq)]
pub struct FaceImage {
    face: CubeFace,
    eye: Eye,
    frame_id: u32,
    width: u32,
    height: u32,
    pixels: Vec<Rgba8>,
}

impl FaceImage {
    pub fn new(
        face: CubeFace,
        eye: Eye,
        frame_id: u32,
        width: u32,
        height: u32,
        pixels: Vec<Rgba8>,
    ) -> Result<Self, FrameError> {
        if pixels.len() != width as usize * height as usize {
            return Err(FrameError::PixelCount {
                width,
                height,
                pixels: pixels.len(),
            });
        }
        Ok(Self {
            face,
            eye,
            frame_id,
            width,
            height,
            pixels,
        })
    }

    pub fn face(&self) -> CubeFace {
        self.face
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[Rgba8] {
        &self.pixels
    }

    /// Raw RGBA bytes, row-major, top row first.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.pixels)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.pixels
            .get(y as usize * self.width as usize + x as usize)
            .copied()
    }

    pub fn into_pixels(self) -> Vec<Rgba8> {
        self.pixels
    }
}

impl fmt::Debug for FaceImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FaceImage")
            .field("face", &self.face)
            .field("eye", &self.eye)
            .field("frame_id", &self.frame_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}

/// All six faces of one eye for one output frame, indexed by [`CubeFace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CubicFrame {
    eye: Eye,
    frame_id: u32,
    faces: [FaceImage; 6],
}

impl CubicFrame {
    /// Assembles a cubic frame, checking that every direction appears exactly
    /// once in ordinal order and that all faces agree on eye, frame and size.
    pub fn new(eye: Eye, frame_id: u32, faces: [FaceImage; 6]) -> Result<Self, FrameError> {
        let (width, height) = (faces[0].width, faces[0].height);
        for (slot, (image, expected)) in faces.iter().zip(CubeFace::ALL).enumerate() {
            if image.face != expected {
                return Err(FrameError::FaceOrder {
                    slot,
                    expected,
                    found: image.face,
                });
            }
            if image.eye != eye {
                return Err(FrameError::EyeMismatch {
                    face: image.face,
                    expected: eye,
                    found: image.eye,
                });
            }
            if image.frame_id != frame_id {
                return Err(FrameError::FrameMismatch {
                    expected: frame_id,
                    found: image.frame_id,
                });
            }
            if image.width != width || image.height != height {
                return Err(FrameError::SizeMismatch {
                    face: image.face,
                    width: image.width,
                    height: image.height,
                    expected_width: width,
                    expected_height: height,
                });
            }
        }
        Ok(Self {
            eye,
            frame_id,
            faces,
        })
    }

    pub fn eye(&self) -> Eye {
        self.eye
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn face(&self, face: CubeFace) -> &FaceImage {
        &self.faces[face.ordinal()]
    }

    pub fn faces(&self) -> &[FaceImage; 6] {
        &self.faces
    }

    /// Edge length of the (square or not) faces as `(width, height)`.
    pub fn face_size(&self) -> (u32, u32) {
        (self.faces[0].width, self.faces[0].height)
    }
}

/// Left and right cubic frames captured at the same simulated instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StereoFrame {
    frame_id: u32,
    left: CubicFrame,
    right: CubicFrame,
}

impl StereoFrame {
    pub fn new(left: CubicFrame, right: CubicFrame) -> Result<Self, FrameError> {
        if left.eye != Eye::Left {
            return Err(FrameError::EyeMismatch {
                face: CubeFace::Left,
                expected: Eye::Left,
                found: left.eye,
            });
        }
        if right.eye != Eye::Right {
            return Err(FrameError::EyeMismatch {
                face: CubeFace::Left,
                expected: Eye::Right,
                found: right.eye,
            });
        }
        if left.frame_id != right.frame_id {
            return Err(FrameError::FrameMismatch {
                expected: left.frame_id,
                found: right.frame_id,
            });
        }
        Ok(Self {
            frame_id: left.frame_id,
            left,
            right,
        })
    }

    pub fn frame_id(&self) -> u32 {
        self.frame_id
    }

    pub fn left(&self) -> &CubicFrame {
        &self.left
    }

    pub fn right(&self) -> &CubicFrame {
        &self.right
    }

    pub fn eye(&self, eye: Eye) -> &CubicFrame {
        match eye {
            Eye::Left => &self.left,
            Eye::Right => &self.right,
        }
    }

    pub fn into_eyes(self) -> (CubicFrame, CubicFrame) {
        (self.left, self.right)
    }
}
