use kernel_env::{EnvId, EnvStatus, EnvType, Kernel, KernelConfig, KernelError};
use kernel_info::memory::{UTEXT, UTOP};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Access, FrameAlloc, PagePermissions};

const NO_PAGE: VirtualAddress = VirtualAddress::new(UTOP);

fn boot() -> (Kernel, EnvId, EnvId) {
    let mut k = Kernel::new(KernelConfig::default().with_max_envs(8).with_physical_pages(256))
        .expect("boot");
    let a = k.create_root(EnvType::User).expect("a");
    let b = k.create_root(EnvType::User).expect("b");
    k.mark_runnable(a).expect("a runnable");
    k.mark_runnable(b).expect("b runnable");
    (k, a, b)
}

#[test]
fn scalar_rendezvous() {
    let (mut k, a, b) = boot();

    k.run(b).expect("run b");
    let next = k.ipc_recv(NO_PAGE).expect("recv");
    assert_eq!(next, Some(a));
    assert_eq!(k.env(b).map(|e| e.status()), Some(EnvStatus::NotRunnable));
    assert!(k.env(b).is_some_and(|e| e.ipc().receiving));

    k.ipc_try_send(b, 42, NO_PAGE, 0).expect("send");
    let env = k.env(b).expect("b");
    assert_eq!(env.status(), EnvStatus::Runnable);
    assert_eq!(env.ipc().value, 42);
    assert_eq!(env.ipc().from, Some(a));
    assert_eq!(env.ipc().perm, None);
    assert!(!env.ipc().receiving);
    assert_eq!(env.trap_frame().regs.eax, 0);

    // First sender wins; nobody is waiting any more.
    assert_eq!(
        k.ipc_try_send(b, 43, NO_PAGE, 0),
        Err(KernelError::IpcNotReceiving)
    );
    assert_eq!(k.env(b).map(|e| e.ipc().value), Some(42));
}

#[test]
fn page_transfer_is_a_shared_mapping() {
    let (mut k, a, b) = boot();
    let src = VirtualAddress::new(UTEXT);
    let dst = VirtualAddress::new(0x0090_0000);

    k.run(b).expect("run b");
    k.ipc_recv(dst).expect("recv");
    assert_eq!(k.current(), Some(a));

    k.page_alloc(a, src, 0x7).expect("alloc");
    k.ipc_try_send(b, 7, src, 0x7).expect("send");

    let (qa, _) = k.env(a).and_then(|e| e.address_space().lookup(src)).expect("a");
    let (qb, eb) = k.env(b).and_then(|e| e.address_space().lookup(dst)).expect("b");
    assert_eq!(qa, qb);
    assert_eq!(eb.permissions(), PagePermissions::user_rw());
    assert_eq!(k.env(b).and_then(|e| e.ipc().perm), Some(PagePermissions::user_rw()));
    assert_eq!(k.frames().refcount(qa), 2);

    k.write_memory(b, dst + 8, b"hello", Access::User).expect("b writes");
    let mut buf = [0u8; 5];
    k.user_read(a, src + 8, &mut buf).expect("a reads");
    assert_eq!(&buf, b"hello");
}

#[test]
fn failed_sends_leave_the_receiver_untouched() {
    let (mut k, a, b) = boot();
    let dst = VirtualAddress::new(0x0090_0000);

    k.run(b).expect("run b");
    k.ipc_recv(dst).expect("recv");
    k.page_alloc(a, VirtualAddress::new(UTEXT), 0x5).expect("read-only page");

    let before = *k.env(b).expect("b").ipc();
    for (srcva, perm) in [
        (UTEXT + 4, 0x5),           // misaligned
        (UTEXT + 0x1000, 0x5),      // unmapped
        (UTEXT, 0x7),               // write to read-only
        (UTEXT, 0x205),             // bad bits
    ] {
        assert_eq!(
            k.ipc_try_send(b, 1, VirtualAddress::new(srcva), perm),
            Err(KernelError::InvalidArgument),
            "srcva {srcva:#x} perm {perm:#x}"
        );
        assert_eq!(k.env(b).map(|e| *e.ipc()), Some(before));
        assert!(k.env(b).is_some_and(|e| e.address_space().lookup(dst).is_none()));
    }
    assert_eq!(k.ipc_try_send(EnvId::from_raw(0x7000), 1, NO_PAGE, 0), Err(KernelError::BadEnvironment));
}

#[test]
fn page_is_not_sent_unless_requested() {
    let (mut k, a, b) = boot();
    k.run(b).expect("run b");
    k.ipc_recv(NO_PAGE).expect("recv");

    let src = VirtualAddress::new(UTEXT);
    k.page_alloc(a, src, 0x7).expect("alloc");
    // Junk permissions are ignored when no page moves.
    k.ipc_try_send(b, 5, src, 0xffff).expect("send");
    assert_eq!(k.env(b).and_then(|e| e.ipc().perm), None);
    assert_eq!(k.user_mappings(b).expect("live").count(), 0);
}

#[test]
fn receive_rejects_misaligned_destination() {
    let (mut k, _a, b) = boot();
    k.run(b).expect("run b");
    assert_eq!(
        k.ipc_recv(VirtualAddress::new(0x0090_0010)),
        Err(KernelError::InvalidArgument)
    );
    assert!(k.env(b).is_some_and(|e| !e.ipc().receiving));
    assert_eq!(k.current(), Some(b));
}

#[test]
fn destroying_a_blocked_receiver_drops_the_receive() {
    let (mut k, a, b) = boot();
    k.run(b).expect("run b");
    k.ipc_recv(NO_PAGE).expect("recv");
    k.destroy(b).expect("destroy");
    assert_eq!(k.ipc_try_send(b, 1, NO_PAGE, 0), Err(KernelError::BadEnvironment));
    assert_eq!(k.current(), Some(a));
}
