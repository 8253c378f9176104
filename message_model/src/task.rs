use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::options::TaskOptions;
use crate::resource::Resource;
use crate::value::Value;

/// A universally unique identifier, generated by the originator. Unique within a controller
/// invocation; never reused, even across retries.
pub type TaskId = Uuid;

/// Tagged sum type carrying a `TaskId`. A receiver dispatches on the variant tag, never by
/// structural inspection of the payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum BaseTask {
    ActionRequest {
        id: TaskId,
        options: TaskOptions,
        action: String,
        action_args: BTreeMap<String, Value>,
    },
    ExecCommandRequest {
        id: TaskId,
        options: TaskOptions,
        cmd: String,
        stdin_key: Option<String>,
    },
    PutFileRequest {
        id: TaskId,
        options: TaskOptions,
        src: Resource,
        dst_path: String,
    },
    FetchFileRequest {
        id: TaskId,
        options: TaskOptions,
        src_path: String,
        dst: Resource,
    },
    ContentDescriptorRequest {
        id: TaskId,
        options: TaskOptions,
        plugin: String,
        key: String,
    },
    WorkerRequest {
        id: TaskId,
        options: TaskOptions,
        ping: String,
    },
    ShutdownWorkerRequest {
        id: TaskId,
        options: TaskOptions,
    },
    TaskResult {
        id: TaskId,
        result: BTreeMap<String, Value>,
    },
    ShutdownWorkerResponse {
        id: TaskId,
        status: ShutdownStatus,
    },
    TaskFailedResult {
        id: TaskId,
        message: String,
    },
}

impl BaseTask {
    pub fn task_id(&self) -> TaskId {
        match self {
            BaseTask::ActionRequest { id, .. }
            | BaseTask::ExecCommandRequest { id, .. }
            | BaseTask::PutFileRequest { id, .. }
            | BaseTask::FetchFileRequest { id, .. }
            | BaseTask::ContentDescriptorRequest { id, .. }
            | BaseTask::WorkerRequest { id, .. }
            | BaseTask::ShutdownWorkerRequest { id, .. }
            | BaseTask::TaskResult { id, .. }
            | BaseTask::ShutdownWorkerResponse { id, .. }
            | BaseTask::TaskFailedResult { id, .. } => *id,
        }
    }

    /// Requests carry `TaskOptions` naming the plugins needed to handle them; responses don't,
    /// since by the time a response exists the options have already done their job.
    pub fn is_request(&self) -> bool {
        matches!(
            self,
            BaseTask::ActionRequest { .. }
                | BaseTask::ExecCommandRequest { .. }
                | BaseTask::PutFileRequest { .. }
                | BaseTask::FetchFileRequest { .. }
                | BaseTask::ContentDescriptorRequest { .. }
                | BaseTask::WorkerRequest { .. }
                | BaseTask::ShutdownWorkerRequest { .. }
        )
    }

    /// The `TaskOptions` a request variant carries, used to pick the workload class it belongs
    /// to (the connection plugin it names, or `None` for requests that don't need one).
    /// Response variants carry no options and return `None`.
    pub fn options(&self) -> Option<&TaskOptions> {
        match self {
            BaseTask::ActionRequest { options, .. }
            | BaseTask::ExecCommandRequest { options, .. }
            | BaseTask::PutFileRequest { options, .. }
            | BaseTask::FetchFileRequest { options, .. }
            | BaseTask::ContentDescriptorRequest { options, .. }
            | BaseTask::WorkerRequest { options, .. }
            | BaseTask::ShutdownWorkerRequest { options, .. } => Some(options),
            BaseTask::TaskResult { .. }
            | BaseTask::ShutdownWorkerResponse { .. }
            | BaseTask::TaskFailedResult { .. } => None,
        }
    }
}

/// A worker's reply to `ShutdownWorkerRequest`. `NeedMoreTime` is reserved for a worker with
/// in-flight sub-requests; the pool does not yet emit it (see the MessageModel open question).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ShutdownStatus {
    Ack,
    Ok,
    NeedMoreTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_extracted_from_every_variant() {
        let id = Uuid::new_v4();
        let task = BaseTask::ShutdownWorkerRequest {
            id,
            options: TaskOptions::new(),
        };
        assert_eq!(task.task_id(), id);

        let result = BaseTask::TaskResult {
            id,
            result: BTreeMap::new(),
        };
        assert_eq!(result.task_id(), id);
        assert!(!result.is_request());
    }

    #[test]
    fn options_present_on_requests_absent_on_responses() {
        let request = BaseTask::ShutdownWorkerRequest {
            id: Uuid::new_v4(),
            options: TaskOptions::new(),
        };
        assert!(request.options().is_some());

        let response = BaseTask::TaskResult {
            id: Uuid::new_v4(),
            result: BTreeMap::new(),
        };
        assert!(response.options().is_none());
    }

    #[test]
    fn action_request_is_a_request() {
        let task = BaseTask::ActionRequest {
            id: Uuid::new_v4(),
            options: TaskOptions::new(),
            action: "raw".to_string(),
            action_args: BTreeMap::new(),
        };
        assert!(task.is_request());
    }
}
