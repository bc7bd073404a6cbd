use kernel_env::{EnvId, EnvStatus, EnvType, Kernel, KernelConfig, KernelError};
use kernel_info::memory::{BLKSIZE, PGSIZE, USTACKTOP, UTEMP, UTEXT, UTOP};
use kernel_loader::elf::ImageBuilder;
use kernel_loader::{ExecError, FsImage, create_env, exec, replace_image};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{Access, PagePermissions};

const ENTRY: u32 = UTEXT + 0x20;

fn boot() -> Kernel {
    Kernel::new(KernelConfig::default().with_max_envs(8).with_physical_pages(512)).expect("boot")
}

fn hello() -> Vec<u8> {
    ImageBuilder::new(ENTRY)
        .segment(UTEXT, b"text text text", 0x1800)
        .segment(0x0090_0000, b"data", 4)
        .build()
}

fn read(k: &Kernel, id: EnvId, va: u32, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    k.read_memory(id, VirtualAddress::new(va), &mut buf, Access::User)
        .expect("readable");
    buf
}

fn word(k: &Kernel, id: EnvId, va: u32) -> u32 {
    let b = read(k, id, va, 4);
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn mapped_pages(k: &Kernel, id: EnvId) -> Vec<u32> {
    k.user_mappings(id)
        .expect("live")
        .map(|m| m.va().as_u32())
        .collect()
}

/// Run a fresh user environment holding some junk pages.
fn running_env(k: &mut Kernel) -> EnvId {
    let id = k.create_root(EnvType::User).expect("env");
    k.page_alloc(id, VirtualAddress::new(0x00a0_0000), 0x7).expect("junk");
    k.page_alloc(id, VirtualAddress::new(UTEMP), 0x7).expect("argv page");
    k.run(id).expect("run");
    id
}

/// Write `args` into `id`'s memory at `UTEMP` as a NULL-terminated vector.
fn marshal(k: &mut Kernel, id: EnvId, args: &[&str]) -> VirtualAddress {
    let table = UTEMP;
    let mut strings = UTEMP + 0x100;
    for (i, arg) in args.iter().enumerate() {
        let mut bytes = arg.as_bytes().to_vec();
        bytes.push(0);
        k.write_memory(id, VirtualAddress::new(strings), &bytes, Access::User)
            .expect("string");
        k.write_memory(id, VirtualAddress::new(table + 4 * i as u32), &strings.to_le_bytes(), Access::User)
            .expect("pointer");
        strings += bytes.len() as u32;
    }
    k.write_memory(id, VirtualAddress::new(table + 4 * args.len() as u32), &[0; 4], Access::User)
        .expect("terminator");
    VirtualAddress::new(table)
}

#[test]
fn boot_time_environment() {
    let mut k = boot();
    let id = create_env(&mut k, &hello(), EnvType::User).expect("create");
    let env = k.env(id).expect("live");
    assert_eq!(env.status(), EnvStatus::Runnable);
    assert_eq!(env.trap_frame().eip, ENTRY);
    assert_eq!(env.trap_frame().esp, USTACKTOP - 12);
    assert!(env.trap_frame().is_user());

    assert_eq!(read(&k, id, UTEXT, 14), b"text text text");
    // The rest of the segment is zero, through the second page.
    assert!(read(&k, id, UTEXT + 14, 0x1800 - 14).iter().all(|&b| b == 0));
    assert_eq!(read(&k, id, 0x0090_0000, 4), b"data");
    assert_eq!(
        mapped_pages(&k, id),
        [UTEXT, UTEXT + PGSIZE, 0x0090_0000, USTACKTOP - 2 * PGSIZE, USTACKTOP - PGSIZE]
    );
    assert_eq!(
        k.page_entry(id, VirtualAddress::new(UTEXT)).map(|e| e.permissions()),
        Some(PagePermissions::user_rw())
    );
}

#[test]
fn memory_beyond_file_size_is_zeroed() {
    let mut k = boot();
    // The second segment zero-fills over bytes the first one wrote.
    let image = ImageBuilder::new(ENTRY)
        .segment(UTEXT + 0x10, &[0xbb; 16], 16)
        .segment(UTEXT, &[0xaa; 16], 0x20)
        .build();
    let id = create_env(&mut k, &image, EnvType::User).expect("create");
    assert_eq!(read(&k, id, UTEXT, 16), [0xaa_u8; 16]);
    assert_eq!(read(&k, id, UTEXT + 16, 16), [0_u8; 16]);
}

#[test]
fn garbage_images_leave_nothing_behind() {
    let mut k = boot();
    let free = k.frames().free_frames();
    assert_eq!(create_env(&mut k, b"not an executable at all", EnvType::User), Err(KernelError::InvalidImage));
    assert_eq!(create_env(&mut k, &[0u8; 64], EnvType::User), Err(KernelError::InvalidImage));
    assert!(k.envs().is_empty());
    assert_eq!(k.frames().free_frames(), free);
}

#[test]
fn rejected_images_leave_the_caller_intact() {
    let mut k = boot();
    let id = running_env(&mut k);
    let before = mapped_pages(&k, id);

    let bad = [
        ImageBuilder::new(ENTRY).segment(UTOP - 0x10, b"x", 0x20).build(),
        ImageBuilder::new(ENTRY).segment(USTACKTOP - PGSIZE, b"x", 1).build(),
        b"\x7fELF but far too short".to_vec(),
    ];
    for image in &bad {
        assert_eq!(
            replace_image(&mut k, id, image.as_slice(), &["x"]),
            Err(ExecError::Rejected(KernelError::InvalidImage))
        );
        assert_eq!(mapped_pages(&k, id), before);
        assert_eq!(k.current(), Some(id));
    }

    // A segment that points past the end of the file.
    let mut truncated = hello();
    truncated.truncate(truncated.len() - 2);
    assert_eq!(
        replace_image(&mut k, id, truncated.as_slice(), &["x"]),
        Err(ExecError::Rejected(KernelError::InvalidImage))
    );
    assert_eq!(mapped_pages(&k, id), before);
}

#[test]
fn file_size_beyond_memory_size_destroys_the_caller() {
    let mut k = boot();
    let id = running_env(&mut k);
    let image = ImageBuilder::new(ENTRY).segment(UTEXT, &[1; 100], 10).build();
    assert_eq!(
        replace_image(&mut k, id, image.as_slice(), &["x"]),
        Err(ExecError::Destroyed(KernelError::InvalidImage))
    );
    assert!(k.env(id).is_none());
    assert_eq!(k.current(), None);
}

#[test]
fn exec_through_the_file_system() {
    let mut k = boot();
    let fs = FsImage::install(&mut k, &[("hello", hello().as_slice())]).expect("fs");
    let id = running_env(&mut k);
    k.set_exception_upcall(id, VirtualAddress::new(0x00f0_0000)).expect("upcall");

    let argv = marshal(&mut k, id, &["hello", "world"]);
    exec(&mut k, fs.open("hello").expect("file"), argv).expect("exec");

    let env = k.env(id).expect("still the same env");
    assert_eq!(env.trap_frame().eip, ENTRY);
    assert_eq!(env.exception_upcall(), None);
    assert!(k.page_entry(id, VirtualAddress::new(0x00a0_0000)).is_some_and(|e| !e.present()));
    assert!(k.page_entry(id, VirtualAddress::new(UTEMP)).is_some_and(|e| !e.present()));

    let esp = env.trap_frame().esp;
    assert_eq!(word(&k, id, esp), 2);
    let argv = word(&k, id, esp + 4);
    assert_eq!(argv, esp + 8);
    assert_eq!(argv % 4, 0);
    assert_eq!(word(&k, id, argv + 8), 0);
    let arg0 = word(&k, id, argv);
    let arg1 = word(&k, id, argv + 4);
    assert_eq!(read(&k, id, arg0, 6), b"hello\0");
    assert_eq!(read(&k, id, arg1, 6), b"world\0");
    // "hello\0world\0" sits right below the stack top.
    assert_eq!(arg0, USTACKTOP - 12);
    assert_eq!(read(&k, id, 0x0090_0000, 4), b"data");
}

#[test]
fn exec_reads_indirect_blocks() {
    let mut k = boot();
    let text: Vec<u8> = (0..12 * BLKSIZE).map(|i| (i % 251) as u8).collect();
    let image = ImageBuilder::new(UTEXT).segment(UTEXT, &text, 12 * BLKSIZE).build();
    let fs = FsImage::install(&mut k, &[("big", image.as_slice())]).expect("fs");
    let id = running_env(&mut k);
    let argv = marshal(&mut k, id, &["big"]);

    exec(&mut k, fs.open("big").expect("file"), argv).expect("exec");
    let tail = UTEXT + 11 * BLKSIZE;
    assert_eq!(read(&k, id, tail, BLKSIZE as usize), &text[11 * BLKSIZE as usize..]);
    assert_eq!(read(&k, id, UTEXT, 16), &text[..16]);
}

#[test]
fn exec_argument_faults_and_missing_file_system() {
    let mut k = boot();
    let id = running_env(&mut k);
    assert_eq!(
        exec(&mut k, VirtualAddress::new(0x1000_1000), VirtualAddress::new(UTEMP)),
        Err(ExecError::Rejected(KernelError::BadEnvironment))
    );

    let fs = FsImage::install(&mut k, &[("hello", hello().as_slice())]).expect("fs");
    let file = fs.open("hello").expect("file");
    assert_eq!(
        exec(&mut k, file, VirtualAddress::new(0x0b00_0000)),
        Err(ExecError::Rejected(KernelError::Faulted))
    );

    // A pointer into kernel memory is as bad as an unmapped one.
    k.write_memory(id, VirtualAddress::new(UTEMP), &0xf010_0000u32.to_le_bytes(), Access::User)
        .expect("pointer");
    assert_eq!(
        exec(&mut k, file, VirtualAddress::new(UTEMP)),
        Err(ExecError::Rejected(KernelError::Faulted))
    );
    assert!(k.page_entry(id, VirtualAddress::new(0x00a0_0000)).is_some_and(|e| e.present()));
}
