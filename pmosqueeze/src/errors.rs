use thiserror::Error;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] pmoslim::SlimError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("cannot parse configuration file: {0}")]
    ConfigFile(#[from] serde_yaml::Error),
    #[error("decoder rejected codec '{0}'")]
    DecoderOpen(char),
    #[error("output start failed: {0}")]
    OutputStart(String),
    #[error("stream connect failed: {0}")]
    StreamConnect(String),
}
