//! Handler registry: path → handler resolution.

use std::collections::HashMap;
use std::sync::Arc;

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{NamespaceKind, NamespaceSet};

use crate::context::HandlerContext;
use crate::handler::{Handler, HandlerKind, HandlerSpec};
use crate::implementations::common::CommonHandler;
use crate::implementations::hidden::HiddenHandler;
use crate::implementations::integer_knob::IntegerKnobHandler;
use crate::implementations::namespaced::NamespacedHandler;

/// Handlers registered at startup.
pub const DEFAULT_HANDLERS: &[HandlerSpec] = &[
    HandlerSpec {
        name: "common",
        path: "/",
        kind: HandlerKind::Common,
        enabled: true,
        cacheable: false,
        write_through: false,
    },
    HandlerSpec {
        name: "kernelPanicOops",
        path: "/proc/sys/kernel/panic_on_oops",
        kind: HandlerKind::IntegerKnob { min: 0, max: 1 },
        enabled: true,
        cacheable: true,
        write_through: false,
    },
    HandlerSpec {
        name: "kernelPanic",
        path: "/proc/sys/kernel/panic",
        // Full i32 range.
        kind: HandlerKind::IntegerKnob {
            min: -2_147_483_648,
            max: 2_147_483_647,
        },
        enabled: true,
        cacheable: true,
        write_through: false,
    },
    HandlerSpec {
        name: "kernelSysrq",
        path: "/proc/sys/kernel/sysrq",
        kind: HandlerKind::IntegerKnob { min: 0, max: 511 },
        enabled: true,
        cacheable: true,
        write_through: false,
    },
    HandlerSpec {
        name: "binfmtMiscRegister",
        path: "/proc/sys/fs/binfmt_misc/register",
        kind: HandlerKind::Hidden,
        enabled: true,
        cacheable: false,
        write_through: false,
    },
    HandlerSpec {
        name: "procSysNet",
        path: "/proc/sys/net",
        kind: HandlerKind::Namespaced {
            namespaces: &[NamespaceKind::Net],
        },
        enabled: true,
        cacheable: false,
        write_through: false,
    },
];

fn build_handler(spec: &HandlerSpec, ctx: &Arc<HandlerContext>) -> Arc<dyn Handler> {
    let spec = spec.clone();
    match spec.kind {
        HandlerKind::Common => Arc::new(CommonHandler::new(spec, Arc::clone(ctx))),
        HandlerKind::IntegerKnob { min, max } => {
            Arc::new(IntegerKnobHandler::new(spec, min, max, Arc::clone(ctx)))
        }
        HandlerKind::Hidden => Arc::new(HiddenHandler::new(spec)),
        HandlerKind::Namespaced { namespaces } => {
            let set: NamespaceSet = namespaces.iter().copied().collect();
            Arc::new(NamespacedHandler::new(spec, set, Arc::clone(ctx)))
        }
    }
}

/// Registry mapping paths and path prefixes to handlers.
///
/// Read-only once built, so lookups need no locking.
#[derive(Debug)]
pub struct HandlerService {
    by_path: HashMap<&'static str, Arc<dyn Handler>>,
    ctx: Arc<HandlerContext>,
}

impl HandlerService {
    /// Builds one handler per table row.
    ///
    /// # Errors
    ///
    /// Returns [`ProcvisorError::Config`] for relative paths or when two rows
    /// share a path or a name.
    pub fn new(specs: &[HandlerSpec], ctx: Arc<HandlerContext>) -> Result<Self> {
        let mut by_path: HashMap<&'static str, Arc<dyn Handler>> = HashMap::new();
        for spec in specs {
            if !spec.path.starts_with('/') {
                return Err(ProcvisorError::Config {
                    message: format!("handler {} has relative path {}", spec.name, spec.path),
                });
            }
            if by_path.values().any(|h| h.spec().name == spec.name) {
                return Err(ProcvisorError::Config {
                    message: format!("duplicate handler name {}", spec.name),
                });
            }
            if by_path.insert(spec.path, build_handler(spec, &ctx)).is_some() {
                return Err(ProcvisorError::Config {
                    message: format!("duplicate handler path {}", spec.path),
                });
            }
            tracing::debug!(name = spec.name, path = spec.path, enabled = spec.enabled, "registered handler");
        }
        Ok(Self { by_path, ctx })
    }

    /// Registry over [`DEFAULT_HANDLERS`].
    ///
    /// # Errors
    ///
    /// Returns an error if the table is inconsistent.
    pub fn with_defaults(ctx: Arc<HandlerContext>) -> Result<Self> {
        Self::new(DEFAULT_HANDLERS, ctx)
    }

    /// Shared dispatch context.
    #[must_use]
    pub const fn context(&self) -> &Arc<HandlerContext> {
        &self.ctx
    }

    fn enabled(&self, path: &str) -> Option<&Arc<dyn Handler>> {
        self.by_path.get(path).filter(|h| h.spec().enabled)
    }

    /// Resolves the handler serving `path`: an exact match first, then the
    /// enabled prefix handler with the longest matching ancestor path.
    #[must_use]
    pub fn lookup_handler(&self, path: &str) -> Option<Arc<dyn Handler>> {
        if let Some(handler) = self.enabled(path) {
            return Some(Arc::clone(handler));
        }

        let mut ancestor = path;
        while let Some(cut) = ancestor.rfind('/') {
            ancestor = if cut == 0 { "/" } else { &ancestor[..cut] };
            if let Some(handler) = self.enabled(ancestor).filter(|h| h.spec().kind.is_prefix()) {
                return Some(Arc::clone(handler));
            }
            if ancestor == "/" {
                break;
            }
        }
        None
    }

    /// Finds a handler by name, enabled or not.
    #[must_use]
    pub fn find_handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.by_path
            .values()
            .find(|h| h.spec().name == name)
            .cloned()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    /// Returns true when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procvisor_core::namespace::pid::PidNsResolver;
    use procvisor_core::sysio::FileIo;
    use procvisor_ipc::event::NsenterEvent;
    use procvisor_ipc::protocol::Message;
    use procvisor_ipc::service::NsenterService;
    use procvisor_state::store::ContainerStateService;

    struct NoResolver;

    impl PidNsResolver for NoResolver {
        fn find_pid_ns_inode(&self, _pid: u32) -> u64 {
            0
        }
    }

    struct NoNsenter;

    impl NsenterService for NoNsenter {
        fn send_request_event(&self, _event: &mut NsenterEvent) -> Result<()> {
            Err(ProcvisorError::transport("unused"))
        }

        fn receive_response_event(&self, _event: &mut NsenterEvent) -> Message {
            Message::transport_error("unused")
        }
    }

    fn ctx() -> Arc<HandlerContext> {
        Arc::new(HandlerContext {
            state: Arc::new(ContainerStateService::new(Arc::new(NoResolver))),
            nsenter: Arc::new(NoNsenter),
            io: Arc::new(FileIo::default()),
            proc_root: "/proc".into(),
            auto_register: false,
        })
    }

    fn name_for(service: &HandlerService, path: &str) -> Option<&'static str> {
        service.lookup_handler(path).map(|h| h.spec().name)
    }

    #[test]
    fn exact_match_wins() {
        let service = HandlerService::with_defaults(ctx()).expect("registry");
        assert_eq!(
            name_for(&service, "/proc/sys/kernel/panic"),
            Some("kernelPanic")
        );
        assert_eq!(
            name_for(&service, "/proc/sys/kernel/panic_on_oops"),
            Some("kernelPanicOops")
        );
    }

    #[test]
    fn longest_prefix_wins_over_catch_all() {
        let service = HandlerService::with_defaults(ctx()).expect("registry");
        assert_eq!(
            name_for(&service, "/proc/sys/net/ipv4/ip_forward"),
            Some("procSysNet")
        );
        assert_eq!(name_for(&service, "/proc/sys/net"), Some("procSysNet"));
        assert_eq!(name_for(&service, "/proc/sys/netfilter"), Some("common"));
        assert_eq!(name_for(&service, "/proc/cpuinfo"), Some("common"));
        assert_eq!(name_for(&service, "/"), Some("common"));
    }

    #[test]
    fn exact_handlers_do_not_cover_children() {
        let service = HandlerService::with_defaults(ctx()).expect("registry");
        assert_eq!(
            name_for(&service, "/proc/sys/kernel/panic/extra"),
            Some("common")
        );
    }

    #[test]
    fn disabled_handlers_are_invisible_to_lookup() {
        let mut specs = DEFAULT_HANDLERS.to_vec();
        for spec in &mut specs {
            if spec.name == "procSysNet" {
                spec.enabled = false;
            }
        }
        let service = HandlerService::new(&specs, ctx()).expect("registry");
        assert_eq!(
            name_for(&service, "/proc/sys/net/ipv4/ip_forward"),
            Some("common")
        );
        assert!(service.find_handler("procSysNet").is_some());
    }

    #[test]
    fn no_catch_all_means_no_handler() {
        let specs: Vec<_> = DEFAULT_HANDLERS
            .iter()
            .filter(|s| s.name != "common")
            .cloned()
            .collect();
        let service = HandlerService::new(&specs, ctx()).expect("registry");
        assert!(service.lookup_handler("/proc/cpuinfo").is_none());
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let specs = [DEFAULT_HANDLERS[1].clone(), DEFAULT_HANDLERS[1].clone()];
        assert!(HandlerService::new(&specs, ctx()).is_err());
    }

    #[test]
    fn find_handler_by_name() {
        let service = HandlerService::with_defaults(ctx()).expect("registry");
        assert_eq!(
            service.find_handler("kernelSysrq").map(|h| h.spec().path),
            Some("/proc/sys/kernel/sysrq")
        );
        assert!(service.find_handler("nope").is_none());
        assert_eq!(service.len(), DEFAULT_HANDLERS.len());
    }
}
