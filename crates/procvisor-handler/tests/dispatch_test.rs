//! End-to-end dispatch through the default handler table.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier, Mutex};

use procvisor_common::error::{ProcvisorError, Result};
use procvisor_common::types::{DirEntry, NamespaceSet, NodeAttr};
use procvisor_core::namespace::pid::PidNsResolver;
use procvisor_core::sysio::{FileIo, HostIo, IoNode};
use procvisor_handler::context::HandlerContext;
use procvisor_handler::handler::Handler;
use procvisor_handler::registry::{DEFAULT_HANDLERS, HandlerService};
use procvisor_ipc::event::NsenterEvent;
use procvisor_ipc::protocol::{Message, ReadFileReply, WriteFileReply};
use procvisor_ipc::service::NsenterService;
use procvisor_state::store::ContainerStateService;

const OOPS: &str = "/proc/sys/kernel/panic_on_oops";
const PID_A: u32 = 100;
const PID_B: u32 = 200;
const PID_UNREGISTERED: u32 = 300;
const PID_GONE: u32 = 400;

struct MapResolver(HashMap<u32, u64>);

impl PidNsResolver for MapResolver {
    fn find_pid_ns_inode(&self, pid: u32) -> u64 {
        self.0.get(&pid).copied().unwrap_or(0)
    }
}

/// Records requests and answers them from a queue.
#[derive(Default)]
struct ScriptedNsenter {
    seen: Mutex<Vec<(u32, NamespaceSet, Message)>>,
    replies: Mutex<VecDeque<Message>>,
}

impl ScriptedNsenter {
    fn reply_with(&self, message: Message) {
        self.replies.lock().unwrap().push_back(message);
    }
}

impl NsenterService for ScriptedNsenter {
    fn send_request_event(&self, event: &mut NsenterEvent) -> Result<()> {
        self.seen.lock().unwrap().push((
            event.pid(),
            event.namespaces().clone(),
            event.request().clone(),
        ));
        Ok(())
    }

    fn receive_response_event(&self, _event: &mut NsenterEvent) -> Message {
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Message::transport_error("no scripted reply"))
    }
}

/// Host I/O whose next `read_line` parks between two barriers.
#[derive(Debug)]
struct PausingIo {
    inner: FileIo,
    armed: AtomicBool,
    reached: Barrier,
    release: Barrier,
}

impl PausingIo {
    fn new(inner: FileIo) -> Self {
        Self {
            inner,
            armed: AtomicBool::new(true),
            reached: Barrier::new(2),
            release: Barrier::new(2),
        }
    }
}

impl HostIo for PausingIo {
    fn stat(&self, node: &IoNode) -> Result<NodeAttr> {
        self.inner.stat(node)
    }

    fn open(&self, node: &IoNode) -> Result<()> {
        self.inner.open(node)
    }

    fn read_line(&self, node: &IoNode) -> Result<String> {
        let line = self.inner.read_line(node)?;
        if self.armed.swap(false, Ordering::SeqCst) {
            let _ = self.reached.wait();
            let _ = self.release.wait();
        }
        Ok(line)
    }

    fn read_all(&self, node: &IoNode) -> Result<Vec<u8>> {
        self.inner.read_all(node)
    }

    fn read_at(&self, node: &IoNode, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.inner.read_at(node, offset, size)
    }

    fn write(&self, node: &IoNode, data: &[u8]) -> Result<usize> {
        self.inner.write(node, data)
    }

    fn read_dir(&self, node: &IoNode) -> Result<Vec<DirEntry>> {
        self.inner.read_dir(node)
    }
}

struct Fixture {
    _host: tempfile::TempDir,
    host_root: std::path::PathBuf,
    nsenter: Arc<ScriptedNsenter>,
    state: Arc<ContainerStateService>,
    registry: HandlerService,
}

fn write_host(root: &Path, path: &str, content: &str) {
    let full = root.join(path.trim_start_matches('/'));
    std::fs::create_dir_all(full.parent().unwrap()).unwrap();
    std::fs::write(full, content).unwrap();
}

fn fixture_with(specs: &[procvisor_handler::handler::HandlerSpec], auto_register: bool) -> Fixture {
    fixture_with_io(specs, auto_register, |io| Arc::new(io) as Arc<dyn HostIo>)
}

fn fixture_with_io(
    specs: &[procvisor_handler::handler::HandlerSpec],
    auto_register: bool,
    wrap_io: impl FnOnce(FileIo) -> Arc<dyn HostIo>,
) -> Fixture {
    let host = tempfile::tempdir().expect("tempdir");
    let host_root = host.path().to_path_buf();
    write_host(&host_root, OOPS, "0\n");
    write_host(&host_root, "/proc/sys/kernel/panic", "0\n");
    write_host(&host_root, "/proc/cpuinfo", "processor\t: 0\n");
    write_host(&host_root, "/proc/sys/fs/binfmt_misc/register", "");

    let resolver = MapResolver(HashMap::from([
        (PID_A, 4_026_531_001),
        (PID_B, 4_026_531_002),
        (PID_UNREGISTERED, 4_026_531_003),
    ]));
    let state = Arc::new(ContainerStateService::new(Arc::new(resolver)));
    let _ = state.register_by_pid(PID_A).expect("register A");
    let _ = state.register_by_pid(PID_B).expect("register B");

    let nsenter = Arc::new(ScriptedNsenter::default());
    let ctx = Arc::new(HandlerContext {
        state: Arc::clone(&state),
        nsenter: Arc::clone(&nsenter) as Arc<dyn NsenterService>,
        io: wrap_io(FileIo::new(&host_root)),
        proc_root: host_root.join("proc"),
        auto_register,
    });
    let registry = HandlerService::new(specs, ctx).expect("registry");
    Fixture {
        _host: host,
        host_root,
        nsenter,
        state,
        registry,
    }
}

fn fixture() -> Fixture {
    fixture_with(DEFAULT_HANDLERS, false)
}

impl Fixture {
    fn handler(&self, path: &str) -> Arc<dyn Handler> {
        self.registry.lookup_handler(path).expect("handler")
    }

    fn read(&self, path: &str, pid: u32) -> Result<String> {
        let bytes = self.handler(path).read(&IoNode::new(path), pid, 4096, 0)?;
        Ok(String::from_utf8(bytes).unwrap())
    }

    fn write(&self, path: &str, pid: u32, data: &str) -> Result<usize> {
        self.handler(path)
            .write(&IoNode::new(path), pid, data.as_bytes())
    }

    fn open(&self, path: &str, pid: u32, flags: i32) -> Result<()> {
        self.handler(path)
            .open(&IoNode::new(path).with_open_flags(flags), pid)
    }

    fn host(&self, path: &str) -> String {
        std::fs::read_to_string(self.host_root.join(path.trim_start_matches('/'))).unwrap()
    }
}

#[test]
fn first_read_seeds_container_from_host() {
    let f = fixture();
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "0\n");

    let container = f.state.container_lookup_by_pid(PID_A).expect("container");
    assert_eq!(
        container.data(OOPS, "panic_on_oops").expect("data"),
        Some("0".into())
    );
}

#[test]
fn container_local_write_is_isolated() {
    let f = fixture();
    assert_eq!(f.read(OOPS, PID_B).expect("read"), "0\n");

    assert_eq!(f.write(OOPS, PID_A, "1").expect("write"), 1);
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "1\n");
    assert_eq!(f.read(OOPS, PID_B).expect("read"), "0\n");
    assert_eq!(f.host(OOPS), "0\n");
}

#[test]
fn host_changes_after_first_read_stay_invisible() {
    let f = fixture();
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "0\n");

    write_host(&f.host_root, OOPS, "1\n");
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "0\n");
    assert_eq!(f.read(OOPS, PID_B).expect("read"), "1\n");
}

#[test]
fn write_during_first_read_is_not_overwritten_by_seed() {
    let mut pausing = None;
    let f = Arc::new(fixture_with_io(DEFAULT_HANDLERS, false, |io| {
        let io = Arc::new(PausingIo::new(io));
        pausing = Some(Arc::clone(&io));
        io as Arc<dyn HostIo>
    }));
    let pausing = pausing.expect("io installed");

    let reader = {
        let f = Arc::clone(&f);
        std::thread::spawn(move || f.read(OOPS, PID_A).expect("read"))
    };
    let _ = pausing.reached.wait();
    assert_eq!(f.write(OOPS, PID_A, "1").expect("write"), 1);
    let _ = pausing.release.wait();

    assert_eq!(reader.join().expect("join"), "1\n");
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "1\n");
}

#[test]
fn written_text_is_stored_as_given() {
    let f = fixture();
    assert_eq!(f.write(OOPS, PID_A, "01\n").expect("write"), 3);
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "01\n");
}

#[test]
fn out_of_range_write_is_rejected_without_mutation() {
    let f = fixture();
    let _ = f.write(OOPS, PID_A, "1\n").expect("write");

    let err = f.write(OOPS, PID_A, "5").expect_err("out of range");
    assert_eq!(err.errno(), libc::EINVAL);
    let err = f.write(OOPS, PID_A, "yes").expect_err("not a number");
    assert_eq!(err.errno(), libc::EINVAL);

    assert_eq!(f.read(OOPS, PID_A).expect("read"), "1\n");
}

#[test]
fn unsupported_open_modes_are_denied() {
    let f = fixture();
    let err = f.open(OOPS, PID_A, libc::O_RDWR).expect_err("rdwr");
    assert_eq!(err.errno(), libc::EACCES);
    let err = f
        .open(OOPS, PID_A, libc::O_WRONLY | libc::O_APPEND)
        .expect_err("append");
    assert_eq!(err.errno(), libc::EACCES);

    f.open(OOPS, PID_A, libc::O_RDONLY).expect("read-only open");
    f.open(OOPS, PID_A, libc::O_WRONLY | libc::O_TRUNC)
        .expect("write-only open");
}

#[test]
fn read_past_start_of_scalar_is_eof() {
    let f = fixture();
    let bytes = f
        .handler(OOPS)
        .read(&IoNode::new(OOPS), PID_A, 4096, 2)
        .expect("read");
    assert!(bytes.is_empty());
}

#[test]
fn unregistered_container_fails_the_operation() {
    let f = fixture();
    let err = f.read(OOPS, PID_UNREGISTERED).expect_err("no container");
    assert!(matches!(err, ProcvisorError::ContainerNotFound { .. }));
    assert_eq!(err.errno(), libc::EIO);
}

#[test]
fn unresolvable_pid_fails_without_side_effects() {
    let f = fixture();
    let before = f.state.container_count().expect("count");

    let err = f.read(OOPS, PID_GONE).expect_err("unresolvable");
    assert_eq!(err.errno(), libc::EIO);
    let err = f.write(OOPS, PID_GONE, "1").expect_err("unresolvable");
    assert_eq!(err.errno(), libc::EIO);

    assert_eq!(f.state.container_count().expect("count"), before);
    assert_eq!(f.read(OOPS, PID_A).expect("read"), "0\n");
}

#[test]
fn auto_register_creates_container_on_first_access() {
    let f = fixture_with(DEFAULT_HANDLERS, true);
    assert_eq!(f.read(OOPS, PID_UNREGISTERED).expect("read"), "0\n");
    assert_eq!(f.state.container_count().expect("count"), 3);
}

#[test]
fn malformed_host_value_is_not_coerced() {
    let f = fixture();
    write_host(&f.host_root, OOPS, "garbage\n");
    let err = f.read(OOPS, PID_A).expect_err("malformed");
    assert_eq!(err.errno(), libc::EINVAL);

    let container = f.state.container_lookup_by_pid(PID_A).expect("container");
    assert!(container.data(OOPS, "panic_on_oops").expect("data").is_none());
}

#[test]
fn write_through_updates_the_host() {
    let mut specs = DEFAULT_HANDLERS.to_vec();
    for spec in &mut specs {
        if spec.path == "/proc/sys/kernel/panic" {
            spec.write_through = true;
        }
    }
    let f = fixture_with(&specs, false);
    assert_eq!(f.write("/proc/sys/kernel/panic", PID_A, "-30\n").expect("write"), 4);
    assert_eq!(f.host("/proc/sys/kernel/panic"), "-30");
    assert_eq!(f.read("/proc/sys/kernel/panic", PID_A).expect("read"), "-30\n");
}

#[test]
fn concurrent_writers_leave_one_of_the_written_values() {
    let f = Arc::new(fixture());
    let values = ["0", "1"];
    let threads: Vec<_> = (0..8)
        .map(|i| {
            let f = Arc::clone(&f);
            std::thread::spawn(move || {
                for _ in 0..50 {
                    let _ = f.write(OOPS, PID_A, values[i % 2]).expect("write");
                }
            })
        })
        .collect();
    for t in threads {
        t.join().expect("join");
    }
    let read = f.read(OOPS, PID_A).expect("read");
    assert!(read == "0\n" || read == "1\n");
}

#[test]
fn hidden_resource_is_invisible() {
    let f = fixture();
    let path = "/proc/sys/fs/binfmt_misc/register";
    let err = f
        .handler(path)
        .lookup(&IoNode::new(path), PID_A)
        .expect_err("hidden");
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn pass_through_is_read_only() {
    let f = fixture();
    assert_eq!(f.read("/proc/cpuinfo", PID_A).expect("read"), "processor\t: 0\n");
    let err = f
        .open("/proc/cpuinfo", PID_A, libc::O_WRONLY)
        .expect_err("read-only");
    assert_eq!(err.errno(), libc::EACCES);

    let entries = f
        .handler("/proc")
        .read_dir_all(&IoNode::new("/proc"), PID_A)
        .expect("readdir");
    assert!(entries.iter().any(|e| e.name == "cpuinfo"));
}

#[test]
fn file_vanishing_after_lookup_fails_reads_with_eio() {
    let f = fixture();
    let path = "/proc/cpuinfo";
    let _ = f.handler(path).lookup(&IoNode::new(path), PID_A).expect("lookup");
    std::fs::remove_file(f.host_root.join("proc/cpuinfo")).unwrap();

    assert_eq!(f.read(path, PID_A).expect_err("vanished").errno(), libc::EIO);
    let err = f
        .handler(path)
        .lookup(&IoNode::new(path), PID_A)
        .expect_err("gone");
    assert_eq!(err.errno(), libc::ENOENT);
}

#[test]
fn namespaced_operations_run_in_the_callers_network_namespace() {
    let f = fixture();
    let path = "/proc/sys/net/ipv4/ip_forward";
    f.nsenter.reply_with(Message::ReadFileResponse(ReadFileReply {
        content: b"1\n".to_vec(),
    }));
    f.nsenter
        .reply_with(Message::WriteFileResponse(WriteFileReply { written: 2 }));

    assert_eq!(f.read(path, PID_A).expect("read"), "1\n");
    assert_eq!(f.write(path, PID_A, "0\n").expect("write"), 2);

    let seen = f.nsenter.seen.lock().unwrap();
    assert_eq!(seen.len(), 2);
    let (pid, namespaces, request) = &seen[0];
    assert_eq!(*pid, PID_A);
    assert_eq!(namespaces.to_string(), "net");
    assert_eq!(request.name(), "readFileRequest");
    // Nothing is cached for namespaced resources.
    let container = f.state.container_lookup_by_pid(PID_A).expect("container");
    assert_eq!(container.data_len().expect("len"), 0);
}

#[test]
fn namespaced_errno_is_passed_through() {
    let f = fixture();
    let path = "/proc/sys/net/ipv4/ip_forward";
    f.nsenter
        .reply_with(Message::errno_error(libc::EACCES, "denied"));
    let err = f.write(path, PID_A, "1").expect_err("denied");
    assert_eq!(err.errno(), libc::EACCES);
}

#[test]
fn namespaced_transport_failure_is_eio() {
    let f = fixture();
    let err = f
        .read("/proc/sys/net/core/somaxconn", PID_A)
        .expect_err("no reply scripted");
    assert!(err.is_transport());
    assert_eq!(err.errno(), libc::EIO);
}
