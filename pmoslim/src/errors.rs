use thiserror::Error;

#[derive(Error, Debug)]
pub enum SlimError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("slimproto frame of {0} bytes exceeds the {max} byte limit", max = crate::MAX_FRAME)]
    FrameTooBig(usize),
    #[error("frame of {0} bytes is too short to carry an opcode")]
    MissingOpcode(usize),
    #[error("truncated {opcode} packet: {len} bytes")]
    Truncated { opcode: &'static str, len: usize },
}
