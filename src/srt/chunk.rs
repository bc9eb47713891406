use bytes::Bytes;

/// One discrete unit of stream data, delivered to every active client per render call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    data: Bytes,
    header: bool,
    keyframe: bool,
}

impl Chunk {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            header: false,
            keyframe: false,
        }
    }

    /// A stream header chunk. Header chunks are kept and replayed to late joiners.
    pub fn header(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            header: true,
            keyframe: false,
        }
    }

    /// Marks the chunk as a decodable entry point (starts a new GOP).
    pub fn with_keyframe(mut self, keyframe: bool) -> Self {
        self.keyframe = keyframe;
        self
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_header(&self) -> bool {
        self.header
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }
}

impl From<Bytes> for Chunk {
    fn from(data: Bytes) -> Self {
        Chunk::new(data)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(data: Vec<u8>) -> Self {
        Chunk::new(data)
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(data: &'static [u8]) -> Self {
        Chunk::new(Bytes::from_static(data))
    }
}
