#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("config ({context}): {detail}")]
    Config { context: &'static str, detail: String },

    #[error("{0}")]
    Engine(#[from] logway_engine::EngineError),

    #[error("api server: {0}")]
    Api(String),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
