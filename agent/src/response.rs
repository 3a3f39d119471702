//! Response builder

use cmdlink_common::{Response, ResponseData, Status};

use crate::executor::ExecutionResult;

/// Build the correlated response for one executed request
pub fn build_response(request_id: &str, command: &str, result: ExecutionResult) -> Response {
    let status = if result.succeeded {
        Status::Success
    } else {
        Status::Failed
    };

    Response {
        request_id: request_id.to_string(),
        data:       ResponseData {
            command: command.to_string(),
            output: result.combined_output,
            status,
        },
    }
}
