//! In-flight namespace-entering transactions.

use procvisor_common::types::NamespaceSet;
use tokio::process::Child;
use uuid::Uuid;

use crate::protocol::Message;

/// One request executed inside a target process's namespaces.
///
/// Owned by the service driving it; the running helper process belongs to
/// the event until the response is collected or the transaction fails.
#[derive(Debug)]
pub struct NsenterEvent {
    id: Uuid,
    pid: u32,
    namespaces: NamespaceSet,
    request: Message,
    response: Option<Message>,
    pub(crate) helper: Option<Child>,
    helper_pid: Option<u32>,
}

impl NsenterEvent {
    /// Creates an event; no helper is started yet.
    #[must_use]
    pub fn new(pid: u32, namespaces: NamespaceSet, request: Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            pid,
            namespaces,
            request,
            response: None,
            helper: None,
            helper_pid: None,
        }
    }

    /// Unique transaction id, used to correlate log lines.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Target process whose namespaces are joined.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Namespaces the helper joins.
    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceSet {
        &self.namespaces
    }

    /// Request sent to the helper.
    #[must_use]
    pub const fn request(&self) -> &Message {
        &self.request
    }

    /// Response, once received.
    #[must_use]
    pub const fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Process id of the helper, once spawned.
    #[must_use]
    pub const fn helper_pid(&self) -> Option<u32> {
        self.helper_pid
    }

    pub(crate) fn attach_helper(&mut self, child: Child) {
        self.helper_pid = child.id();
        self.helper = Some(child);
    }

    pub(crate) fn set_response(&mut self, response: Message) {
        self.response = Some(response);
    }
}
