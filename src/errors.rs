use std::fmt;

#[derive(Debug, Clone)]
pub enum AffilinkError {
    Serialization(String),
    NotFound(String),
    ProxyUnreachable(String),
    SyncFailure(String),
    FileOperation(String),
}

impl AffilinkError {
    /// 获取错误代码
    pub fn code(&self) -> &'static str {
        match self {
            AffilinkError::Serialization(_) => "E001",
            AffilinkError::NotFound(_) => "E002",
            AffilinkError::ProxyUnreachable(_) => "E003",
            AffilinkError::SyncFailure(_) => "E004",
            AffilinkError::FileOperation(_) => "E005",
        }
    }

    /// 获取错误类型名称
    pub fn error_type(&self) -> &'static str {
        match self {
            AffilinkError::Serialization(_) => "Serialization Error",
            AffilinkError::NotFound(_) => "Resource Not Found",
            AffilinkError::ProxyUnreachable(_) => "Proxy Unreachable",
            AffilinkError::SyncFailure(_) => "Entitlement Sync Failure",
            AffilinkError::FileOperation(_) => "File Operation Error",
        }
    }

    /// 获取错误详情
    pub fn message(&self) -> &str {
        match self {
            AffilinkError::Serialization(msg) => msg,
            AffilinkError::NotFound(msg) => msg,
            AffilinkError::ProxyUnreachable(msg) => msg,
            AffilinkError::SyncFailure(msg) => msg,
            AffilinkError::FileOperation(msg) => msg,
        }
    }
}

impl fmt::Display for AffilinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.code(), self.error_type(), self.message())
    }
}

impl std::error::Error for AffilinkError {}

// 便捷的构造函数
impl AffilinkError {
    pub fn serialization<T: Into<String>>(msg: T) -> Self {
        AffilinkError::Serialization(msg.into())
    }

    pub fn not_found<T: Into<String>>(msg: T) -> Self {
        AffilinkError::NotFound(msg.into())
    }

    pub fn proxy_unreachable<T: Into<String>>(msg: T) -> Self {
        AffilinkError::ProxyUnreachable(msg.into())
    }

    pub fn sync_failure<T: Into<String>>(msg: T) -> Self {
        AffilinkError::SyncFailure(msg.into())
    }

    pub fn file_operation<T: Into<String>>(msg: T) -> Self {
        AffilinkError::FileOperation(msg.into())
    }
}

// 为常见的错误类型实现 From trait
impl From<std::io::Error> for AffilinkError {
    fn from(err: std::io::Error) -> Self {
        AffilinkError::FileOperation(err.to_string())
    }
}

impl From<serde_json::Error> for AffilinkError {
    fn from(err: serde_json::Error) -> Self {
        AffilinkError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AffilinkError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_and_display() {
        let err = AffilinkError::not_found("verification 'v1' not found");
        assert_eq!(err.code(), "E002");
        assert_eq!(err.error_type(), "Resource Not Found");
        assert_eq!(
            err.to_string(),
            "[E002] Resource Not Found: verification 'v1' not found"
        );
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: AffilinkError = io.into();
        assert_eq!(err.code(), "E005");
        assert!(err.message().contains("denied"));
    }
}
