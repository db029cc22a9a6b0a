use failure::Fail;

#[derive(Debug, Fail)]
pub enum PipelineError {
    #[fail(display = "video source {} is unavailable: {}", path, reason)]
    SourceUnavailable { path: String, reason: String },
}

impl PipelineError {
    pub fn unavailable(path: &std::path::Path, reason: impl ToString) -> Self {
        PipelineError::SourceUnavailable {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
