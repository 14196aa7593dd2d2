use alloc::vec;
use alloc::vec::Vec;
use core::fmt;

use crate::fs::RamFs;
use crate::memory::{AddressSpace, MemError, PageFlags, Vm, PGSIZE};
use crate::scheduler::context::Context;
use crate::scheduler::table::ProcError;

// ══════════════════════════════════════════════════════════════
//  ELF32 constants
// ══════════════════════════════════════════════════════════════

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFDATA2LSB: u8 = 1;
const ET_EXEC: u16 = 2;
const EM_386: u16 = 3;
const PT_LOAD: u32 = 1;
const PF_W: u32 = 2;

const EHDR_SIZE: usize = 52;
const PHDR_SIZE: usize = 32;

/// Most arguments `exec` passes to a program.
pub const MAX_ARGS: usize = 31;

fn le_u16(data: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([data[off], data[off + 1]])
}

fn le_u32(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

// ══════════════════════════════════════════════════════════════
//  ELF32 structures
// ══════════════════════════════════════════════════════════════

struct Elf32Ehdr {
    e_entry: u32,
    e_phoff: u32,
    e_phentsize: u16,
    e_phnum: u16,
}

impl Elf32Ehdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < EHDR_SIZE { return Err(ExecError::InvalidFormat); }
        if data[0..4] != ELF_MAGIC { return Err(ExecError::InvalidFormat); }
        if data[4] != ELFCLASS32 { return Err(ExecError::UnsupportedArch); }
        if data[5] != ELFDATA2LSB { return Err(ExecError::UnsupportedArch); }

        let e_type = le_u16(data, 16);
        let e_machine = le_u16(data, 18);
        if e_type != ET_EXEC { return Err(ExecError::UnsupportedType); }
        if e_machine != EM_386 { return Err(ExecError::UnsupportedArch); }

        Ok(Elf32Ehdr {
            e_entry: le_u32(data, 24),
            e_phoff: le_u32(data, 28),
            e_phentsize: le_u16(data, 42),
            e_phnum: le_u16(data, 44),
        })
    }
}

struct Elf32Phdr {
    p_type: u32,
    p_offset: u32,
    p_vaddr: u32,
    p_filesz: u32,
    p_memsz: u32,
    p_flags: u32,
}

impl Elf32Phdr {
    fn parse(data: &[u8]) -> Result<Self, ExecError> {
        if data.len() < PHDR_SIZE { return Err(ExecError::InvalidFormat); }
        Ok(Elf32Phdr {
            p_type: le_u32(data, 0),
            p_offset: le_u32(data, 4),
            p_vaddr: le_u32(data, 8),
            p_filesz: le_u32(data, 16),
            p_memsz: le_u32(data, 20),
            p_flags: le_u32(data, 24),
        })
    }
}

// ══════════════════════════════════════════════════════════════
//  ExecError
// ══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecError {
    FileNotFound,
    InvalidFormat,
    UnsupportedArch,
    UnsupportedType,
    BadSegment,
    ArgsTooLong,
    ProcessTableFull,
    MemoryError,
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ExecError::FileNotFound     => write!(f, "File not found"),
            ExecError::InvalidFormat    => write!(f, "Invalid ELF format"),
            ExecError::UnsupportedArch  => write!(f, "Unsupported architecture"),
            ExecError::UnsupportedType  => write!(f, "Unsupported ELF type (need ET_EXEC)"),
            ExecError::BadSegment       => write!(f, "Segment outside user space"),
            ExecError::ArgsTooLong      => write!(f, "Argument list too long"),
            ExecError::ProcessTableFull => write!(f, "Process table full"),
            ExecError::MemoryError      => write!(f, "Memory allocation error"),
        }
    }
}

impl From<MemError> for ExecError {
    fn from(_: MemError) -> Self {
        ExecError::MemoryError
    }
}

impl From<ProcError> for ExecError {
    fn from(e: ProcError) -> Self {
        match e {
            ProcError::OutOfMemory => ExecError::MemoryError,
            ProcError::NoFreeSlot | ProcError::TableFull => ExecError::ProcessTableFull,
        }
    }
}

// ══════════════════════════════════════════════════════════════
//  ELF Loader
// ══════════════════════════════════════════════════════════════

/// Load the program at `path` into the empty address space `space`.
///
/// Returns the frame that enters the program with `argv` on its stack.
/// On error `space` may hold a partial image; the caller tears it down.
pub fn load_into(
    vm: &mut Vm,
    fs: &RamFs,
    space: &AddressSpace,
    path: &str,
    argv: &[Vec<u8>],
) -> Result<Context, ExecError> {
    if argv.len() > MAX_ARGS {
        return Err(ExecError::ArgsTooLong);
    }
    let image = fs.read_all(path).map_err(|_| ExecError::FileNotFound)?;
    let ehdr = Elf32Ehdr::parse(&image)?;
    let layout = *vm.layout();
    let stack_page = layout.usr_mem - PGSIZE;

    for i in 0..ehdr.e_phnum as usize {
        let off = ehdr.e_phoff as usize + i * ehdr.e_phentsize as usize;
        let phdr = Elf32Phdr::parse(image.get(off..).ok_or(ExecError::InvalidFormat)?)?;
        if phdr.p_type != PT_LOAD { continue; }

        let start = phdr.p_vaddr as usize;
        let memsz = phdr.p_memsz as usize;
        let filesz = phdr.p_filesz as usize;
        let end = start.checked_add(memsz).ok_or(ExecError::BadSegment)?;
        if start < layout.phy_mem || end > stack_page || filesz > memsz {
            return Err(ExecError::BadSegment);
        }
        let file_start = phdr.p_offset as usize;
        let bytes = image.get(file_start..file_start + filesz).ok_or(ExecError::InvalidFormat)?;

        let mut perm = PageFlags::USER;
        if phdr.p_flags & PF_W != 0 {
            perm |= PageFlags::WRITABLE;
        }
        vm.map_range(space, start, memsz, perm)?;
        vm.write_virt(space.root(), start, bytes, PageFlags::empty());
        if memsz > filesz {
            vm.write_virt(space.root(), start + filesz, &vec![0u8; memsz - filesz], PageFlags::empty());
        }
    }

    let esp = push_args(vm, space, stack_page, argv)?;
    crate::log_info!("ELF: loaded '{}', entry={:#x} esp={:#x}", path, ehdr.e_entry, esp);
    Ok(Context::user(ehdr.e_entry, esp))
}

/// Build the initial user stack in the page at `stack_page`.
///
/// From `esp` upwards: a return-address hole, `argc`, `argv`, the argv
/// pointer array with its NULL, padding, then the strings.
fn push_args(vm: &mut Vm, space: &AddressSpace, stack_page: usize, argv: &[Vec<u8>]) -> Result<u32, ExecError> {
    let strings: usize = argv.iter().map(|a| a.len() + 1).sum();
    let words = argv.len() + 1 + 3;
    if strings + 3 + words * 4 > PGSIZE {
        return Err(ExecError::ArgsTooLong);
    }
    vm.map_range(space, stack_page, PGSIZE, PageFlags::USER | PageFlags::WRITABLE)?;

    let root = space.root();
    let mut sp = stack_page + PGSIZE;
    let mut pointers: Vec<u32> = Vec::with_capacity(argv.len() + 1);
    for arg in argv {
        sp -= arg.len() + 1;
        vm.write_virt(root, sp, arg, PageFlags::empty());
        vm.write_virt(root, sp + arg.len(), &[0], PageFlags::empty());
        pointers.push(sp as u32);
    }
    pointers.push(0);
    sp -= sp % 4;

    let push = |vm: &mut Vm, sp: &mut usize, word: u32| {
        *sp -= 4;
        vm.write_virt(root, *sp, &word.to_le_bytes(), PageFlags::empty());
    };
    for &ptr in pointers.iter().rev() {
        push(vm, &mut sp, ptr);
    }
    let argv_addr = sp as u32;
    push(vm, &mut sp, argv_addr);
    push(vm, &mut sp, argv.len() as u32);
    sp -= 4;
    Ok(sp as u32)
}
