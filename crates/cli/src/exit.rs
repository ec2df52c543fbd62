//! Process exit codes

use automesh_common::Error;

pub const MISSING_PARAMETERS: i32 = 10;
pub const INVALID_CIDR: i32 = 11;
pub const INVALID_PARAMETER: i32 = 12;
pub const UNABLE_TO_CREATE: i32 = 20;
pub const UNABLE_TO_JOIN: i32 = 21;
pub const UNABLE_TO_UPDATE: i32 = 22;
pub const UNABLE_TO_LEAVE: i32 = 23;
pub const UNABLE_TO_DELETE: i32 = 24;
pub const UNABLE_TO_LIST: i32 = 25;

/// Failure category of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Create,
    Join,
    Update,
    Leave,
    Delete,
    List,
}

impl Category {
    pub fn code(self) -> i32 {
        match self {
            Category::Create => UNABLE_TO_CREATE,
            Category::Join => UNABLE_TO_JOIN,
            Category::Update => UNABLE_TO_UPDATE,
            Category::Leave => UNABLE_TO_LEAVE,
            Category::Delete => UNABLE_TO_DELETE,
            Category::List => UNABLE_TO_LIST,
        }
    }
}

/// Exit code for a failed command. Bad input wins over the command's category.
pub fn code_for(err: &anyhow::Error, category: Category) -> i32 {
    match err.chain().find_map(|e| e.downcast_ref::<Error>()) {
        Some(Error::MissingParameter(_)) => MISSING_PARAMETERS,
        Some(Error::InvalidCidr(_)) => INVALID_CIDR,
        Some(Error::InvalidParameter(_)) => INVALID_PARAMETER,
        _ => category.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    fn wrapped(e: Error) -> anyhow::Error {
        Err::<(), _>(e).context("unable to do it").unwrap_err()
    }

    #[test]
    fn test_configuration_errors_win() {
        assert_eq!(
            code_for(&wrapped(Error::MissingParameter("name".into())), Category::Join),
            MISSING_PARAMETERS
        );
        assert_eq!(
            code_for(&wrapped(Error::InvalidCidr("x".into())), Category::Create),
            INVALID_CIDR
        );
        assert_eq!(
            code_for(&wrapped(Error::InvalidParameter("eth9".into())), Category::Join),
            INVALID_PARAMETER
        );
        let bad_id = Error::InvalidParameter("id \"rack1/a\"".into());
        assert_eq!(code_for(&wrapped(bad_id), Category::Leave), INVALID_PARAMETER);
    }

    #[test]
    fn test_operation_errors_use_category() {
        assert_eq!(
            code_for(&wrapped(Error::NotJoined("wg-test".into())), Category::Leave),
            UNABLE_TO_LEAVE
        );
        assert_eq!(
            code_for(&wrapped(Error::MeshNotFound("test".into())), Category::Join),
            UNABLE_TO_JOIN
        );
        assert_eq!(
            code_for(&anyhow::anyhow!("store down"), Category::Delete),
            UNABLE_TO_DELETE
        );
        assert_eq!(Category::Update.code(), 22);
        assert_eq!(Category::List.code(), 25);
    }
}
