use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service '{name}' is not registered")]
    NotRegistered { name: String },
    #[error("failed to {action} service '{name}': {detail}")]
    Command {
        action: &'static str,
        name: String,
        detail: String,
    },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn not_registered(name: &str) -> Self {
        Self::NotRegistered {
            name: name.to_string(),
        }
    }

    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::NotRegistered { .. })
    }
}
