#![allow(dead_code)]

use minikern::interrupts::InterruptIndex;
use minikern::{Context, Kernel, KernelConfig, ProcessId};

/// Load address of the test programs.
pub const BASE: u32 = 0x0100_0000;
/// Writable scratch memory inside every test program.
pub const SCRATCH: usize = 0x0100_1000;
/// Bytes of the program segment: one code page and two scratch pages.
pub const IMAGE_SPAN: u32 = 0x3000;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// A minimal ELF32 `ET_EXEC` for i386 with one loadable segment at `vaddr`.
pub fn elf_image(vaddr: u32, code: &[u8], memsz: u32, writable: bool) -> Vec<u8> {
    let mut out = vec![0u8; EHDR_SIZE + PHDR_SIZE];
    out[0..4].copy_from_slice(b"\x7FELF");
    out[4] = 1; // ELFCLASS32
    out[5] = 1; // little endian
    out[6] = 1;
    out[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out[18..20].copy_from_slice(&3u16.to_le_bytes()); // EM_386
    out[24..28].copy_from_slice(&vaddr.to_le_bytes());
    out[28..32].copy_from_slice(&(EHDR_SIZE as u32).to_le_bytes());
    out[42..44].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out[44..46].copy_from_slice(&1u16.to_le_bytes());

    let ph = EHDR_SIZE;
    out[ph..ph + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
    out[ph + 4..ph + 8].copy_from_slice(&((EHDR_SIZE + PHDR_SIZE) as u32).to_le_bytes());
    out[ph + 8..ph + 12].copy_from_slice(&vaddr.to_le_bytes());
    out[ph + 16..ph + 20].copy_from_slice(&(code.len() as u32).to_le_bytes());
    out[ph + 20..ph + 24].copy_from_slice(&memsz.to_le_bytes());
    let flags: u32 = if writable { 4 | 2 | 1 } else { 4 | 1 };
    out[ph + 24..ph + 28].copy_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(code);
    out
}

pub fn install(kernel: &mut Kernel, path: &str, image: &[u8]) {
    let inode = kernel.fs.create(path).unwrap();
    kernel.fs.write(inode.id, 0, image).unwrap();
}

/// Plays user space: holds the registers of whichever process runs.
pub struct Machine {
    pub kernel: Kernel,
    pub regs: Context,
}

impl Machine {
    pub fn boot() -> Self {
        Self::boot_with(KernelConfig::default())
    }

    /// Boot, install `/bin/init` and run it as pid 1.
    pub fn boot_with(config: KernelConfig) -> Self {
        let mut kernel = Kernel::boot(config);
        install(&mut kernel, "/bin/init", &elf_image(BASE, b"\x90\xEB\xFE", IMAGE_SPAN, true));
        kernel.spawn("/bin/init", &["init"]).unwrap();
        let regs = kernel.start();
        let machine = Machine { kernel, regs };
        assert_eq!(machine.pid(), 1);
        machine
    }

    pub fn pid(&self) -> u32 {
        let ProcessId(pid) = self.kernel.current_pid();
        pid
    }

    /// `int 0x80` from the running process. Returns EAX of the process
    /// that runs afterwards.
    pub fn syscall(&mut self, number: u32, args: &[u32]) -> i32 {
        let mut ctx = self.regs;
        ctx.irq = InterruptIndex::Syscall.as_u32();
        ctx.eax = number;
        let mut regs = [0u32; 5];
        regs[..args.len()].copy_from_slice(args);
        ctx.ebx = regs[0];
        ctx.ecx = regs[1];
        ctx.edx = regs[2];
        ctx.esi = regs[3];
        ctx.edi = regs[4];
        self.regs = self.kernel.trap(ctx);
        self.regs.eax as i32
    }

    pub fn timer(&mut self) {
        let mut ctx = self.regs;
        ctx.irq = InterruptIndex::Timer.as_u32();
        self.regs = self.kernel.trap(ctx);
    }

    /// EAX of the running process: the result of the syscall it last trapped with.
    pub fn ret(&self) -> i32 {
        self.regs.eax as i32
    }

    pub fn store(&mut self, va: usize, data: &[u8]) {
        self.kernel.user_store(va, data);
    }

    pub fn load(&self, va: usize, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        self.kernel.user_load(va, &mut buf);
        buf
    }

    pub fn load_u32(&self, va: usize) -> u32 {
        let bytes = self.load(va, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Put a NUL-terminated string in scratch memory at `va`.
    pub fn store_str(&mut self, va: usize, s: &str) -> u32 {
        let mut bytes = s.as_bytes().to_vec();
        bytes.push(0);
        self.store(va, &bytes);
        va as u32
    }
}
