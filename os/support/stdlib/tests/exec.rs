use kernel_env::{EnvId, EnvType, Kernel, KernelConfig, KernelError};
use kernel_info::memory::{UTEMP, UTEXT};
use kernel_loader::FsImage;
use kernel_loader::elf::ImageBuilder;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::BufferConsole;
use kernel_vmem::Access;
use stdlib::{Program, UserEnv, UserError};

const ENTRY: u32 = UTEXT + 0x10;

fn boot() -> (Kernel, EnvId, FsImage) {
    let mut k = Kernel::new(KernelConfig::default().with_max_envs(8).with_physical_pages(512))
        .expect("boot");
    let a = k.create_root(EnvType::User).expect("a");
    k.run(a).expect("run");
    let echo = ImageBuilder::new(ENTRY).segment(UTEXT, b"echo echo", 0x100).build();
    let fs = FsImage::install(&mut k, &[("echo", echo.as_slice()), ("notes.txt", b"not a program".as_slice())])
        .expect("fs");
    (k, a, fs)
}

fn word(k: &Kernel, id: EnvId, va: u32) -> u32 {
    let mut b = [0u8; 4];
    k.read_memory(id, VirtualAddress::new(va), &mut b, Access::User)
        .expect("readable");
    u32::from_le_bytes(b)
}

fn string(k: &Kernel, id: EnvId, va: u32) -> String {
    let mut bytes = Vec::new();
    let mut at = va;
    loop {
        let mut b = [0u8; 1];
        k.read_memory(id, VirtualAddress::new(at), &mut b, Access::User)
            .expect("readable");
        if b[0] == 0 {
            return String::from_utf8(bytes).expect("utf-8");
        }
        bytes.push(b[0]);
        at += 1;
    }
}

#[test]
fn exec_replaces_the_image_and_passes_arguments() {
    let (mut k, a, fs) = boot();
    let mut con = BufferConsole::new();
    let program = Program::new();
    let echo = fs.open("echo").expect("echo");
    {
        let mut env = UserEnv::new(&mut k, &mut con, &program, a);
        env.sys_page_alloc(EnvId::CURRENT, VirtualAddress::new(0x00a0_0000), 0x7)
            .expect("old image");
        env.exec(echo, &["echo", "hello", "world"]).expect("exec");
    }

    let tf = *k.env(a).expect("same env").trap_frame();
    assert_eq!(tf.eip, ENTRY);
    assert_eq!(word(&k, a, tf.esp), 3);
    let argv = word(&k, a, tf.esp + 4);
    let args: Vec<String> = (0..3).map(|i| string(&k, a, word(&k, a, argv + 4 * i))).collect();
    assert_eq!(args, ["echo", "hello", "world"]);
    assert_eq!(word(&k, a, argv + 12), 0);

    // Nothing of the old image survives, including the staging page.
    assert!(!k.page_entry(a, VirtualAddress::new(0x00a0_0000)).expect("live").present());
    assert!(!k.page_entry(a, VirtualAddress::new(UTEMP)).expect("live").present());
}

#[test]
fn rejected_exec_leaves_the_caller_running() {
    let (mut k, a, fs) = boot();
    let mut con = BufferConsole::new();
    let program = Program::new();
    let notes = fs.open("notes.txt").expect("notes");
    let echo = fs.open("echo").expect("echo");
    {
        let mut env = UserEnv::new(&mut k, &mut con, &program, a);
        assert_eq!(
            env.exec(notes, &["notes.txt"]),
            Err(UserError::Syscall(KernelError::InvalidImage))
        );
        let too_long = "x".repeat(5000);
        assert_eq!(
            env.exec(echo, &[too_long.as_str()]),
            Err(UserError::Syscall(KernelError::InvalidArgument))
        );
        stdlib::println!(&mut env, "still here").expect("print");
    }
    assert_eq!(k.current(), Some(a));
    assert!(!k.page_entry(a, VirtualAddress::new(UTEMP)).expect("live").present());
    assert_eq!(con.output(), b"still here\n");
}
