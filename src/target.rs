/* Per-architecture oracle consulted while scanning relocations
 *
 * The writer never applies a relocation; it only has to answer layout
 * questions: does this relocation force a GOT or PLT slot, a copy into
 * .bss, a TLS pair, or a dynamic relocation the loader must see? The
 * answers are architecture-specific, so they live behind this trait
 * along with the handful of relocation type numbers the writer emits.
 *
 * An x86-64 oracle ships with the crate; other architectures plug in
 * the same way.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::reloc::*;

use super::symbols::Symbol;

/* how badly a relocation wants a PLT entry */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PltNeed
{
    No,
    Explicit,   /* a call through the PLT was asked for */
    Implicit    /* a direct reference to a shared function; the PLT entry
                   stands in as the function's address */
}

pub trait TargetOracle
{
    /* layout parameters */
    fn page_size(&self) -> u64;
    fn va_start(&self, shared: bool) -> u64;
    fn use_lazy_binding(&self) -> bool;
    fn plt_header_size(&self) -> u64;
    fn plt_entry_size(&self) -> u64;

    /* dynamic relocation type numbers the writer emits */
    fn copy_rel(&self) -> u32;
    fn got_rel(&self) -> u32;
    fn plt_rel(&self) -> u32;
    fn relative_rel(&self) -> u32;
    fn irelative_rel(&self) -> u32;
    fn tls_got_rel(&self) -> u32;
    fn tls_module_index_rel(&self) -> u32;
    fn tls_offset_rel(&self) -> u32;

    /* classification of incoming relocation types */
    fn is_hint(&self, _rel_type: u32) -> bool { false }
    fn is_got_relative(&self, _rel_type: u32) -> bool { false }
    fn is_tls_local_dynamic(&self, _rel_type: u32) -> bool { false }
    fn is_tls_global_dynamic(&self, _rel_type: u32) -> bool { false }
    fn is_tls_dyn(&self, _rel_type: u32) -> bool { false }
    fn can_relax_tls(&self, _rel_type: u32, _shared: bool) -> bool { false }
    fn needs_dyn_relative(&self, _rel_type: u32) -> bool { false }
    fn needs_copy_rel(&self, _rel_type: u32, _sym: &Symbol, _shared_output: bool) -> bool { false }
    fn needs_plt(&self, _rel_type: u32, _sym: &Symbol, _preemptible: bool) -> PltNeed { PltNeed::No }
    fn needs_got(&self, _rel_type: u32, _sym: &Symbol) -> bool { false }
    fn is_rel_relative(&self, _rel_type: u32) -> bool { false }
    fn is_size_rel(&self, _rel_type: u32) -> bool { false }

    /* the dynamic relocation type standing in for an incoming type when
       the loader has to resolve the site itself */
    fn get_dyn_rel(&self, rel_type: u32) -> u32 { rel_type }

    /* stub generation. the writer only needs the bytes; how the stubs
       reach the GOT is the architecture's business. defaults leave the
       stubs zeroed for targets that fill them elsewhere */
    fn write_plt_header(&self, _buf: &mut [u8], _gotplt_va: u64, _plt_va: u64) {}
    fn write_plt_entry(&self, _buf: &mut [u8], _got_entry_va: u64, _plt_entry_va: u64, _index: u32) {}

    /* what a lazy .got.plt slot holds before the first call: the spot
       in the PLT entry that pushes the relocation index */
    fn got_plt_entry_value(&self, _plt_entry_va: u64) -> u64 { 0 }
}

/* ---------------------------------------------------------------- */

/* the x86-64 answers. System V ABI, small code model */
pub struct X86_64;

impl TargetOracle for X86_64
{
    fn page_size(&self) -> u64 { 0x1000 }

    fn va_start(&self, shared: bool) -> u64
    {
        if shared { 0 } else { 0x40_0000 }
    }

    fn use_lazy_binding(&self) -> bool { true }
    fn plt_header_size(&self) -> u64 { 16 }
    fn plt_entry_size(&self) -> u64 { 16 }

    fn copy_rel(&self) -> u32 { R_X86_64_COPY }
    fn got_rel(&self) -> u32 { R_X86_64_GLOB_DAT }
    fn plt_rel(&self) -> u32 { R_X86_64_JUMP_SLOT }
    fn relative_rel(&self) -> u32 { R_X86_64_RELATIVE }
    fn irelative_rel(&self) -> u32 { R_X86_64_IRELATIVE }
    fn tls_got_rel(&self) -> u32 { R_X86_64_TPOFF64 }
    fn tls_module_index_rel(&self) -> u32 { R_X86_64_DTPMOD64 }
    fn tls_offset_rel(&self) -> u32 { R_X86_64_DTPOFF64 }

    fn is_got_relative(&self, rel_type: u32) -> bool
    {
        rel_type == R_X86_64_GOTOFF64
    }

    fn is_tls_local_dynamic(&self, rel_type: u32) -> bool
    {
        rel_type == R_X86_64_TLSLD
    }

    fn is_tls_global_dynamic(&self, rel_type: u32) -> bool
    {
        rel_type == R_X86_64_TLSGD
    }

    fn is_tls_dyn(&self, rel_type: u32) -> bool
    {
        /* these keep flowing through the scan so the GOT slot and its
           relocation get made: initial-exec always, general-dynamic
           when it was relaxed to initial-exec for a preemptible symbol */
        matches!(rel_type, R_X86_64_GOTTPOFF | R_X86_64_TLSGD)
    }

    /* general- and local-dynamic sequences relax to initial-exec or
       local-exec when the final addresses are ours to know */
    fn can_relax_tls(&self, rel_type: u32, shared: bool) -> bool
    {
        if shared
        {
            return false;
        }
        matches!(rel_type, R_X86_64_TLSLD | R_X86_64_TLSGD | R_X86_64_GOTTPOFF)
    }

    fn needs_copy_rel(&self, rel_type: u32, sym: &Symbol, shared_output: bool) -> bool
    {
        if shared_output || sym.is_func()
        {
            return false;
        }
        matches!(rel_type, R_X86_64_64 | R_X86_64_32 | R_X86_64_32S | R_X86_64_PC32)
    }

    fn needs_plt(&self, rel_type: u32, sym: &Symbol, preemptible: bool) -> PltNeed
    {
        match rel_type
        {
            R_X86_64_PLT32 if preemptible => PltNeed::Explicit,

            /* a direct reference to a function living in a shared
               library: the PLT entry becomes the canonical address */
            R_X86_64_PC32 | R_X86_64_32 | R_X86_64_64 if sym.is_shared() && sym.is_func() =>
                PltNeed::Implicit,

            _ => PltNeed::No
        }
    }

    fn needs_got(&self, rel_type: u32, _sym: &Symbol) -> bool
    {
        matches!(rel_type, R_X86_64_GOT32 | R_X86_64_GOTPCREL | R_X86_64_GOTTPOFF | R_X86_64_TLSGD)
    }

    fn is_rel_relative(&self, rel_type: u32) -> bool
    {
        matches!(rel_type,
            R_X86_64_PC8 | R_X86_64_PC16 | R_X86_64_PC32 | R_X86_64_PC64 |
            R_X86_64_PLT32 | R_X86_64_GOTPCREL)
    }

    fn is_size_rel(&self, rel_type: u32) -> bool
    {
        matches!(rel_type, R_X86_64_SIZE32 | R_X86_64_SIZE64)
    }

    fn get_dyn_rel(&self, rel_type: u32) -> u32
    {
        /* sign-extending and plain 32-bit stores are the same thing to
           the loader */
        if rel_type == R_X86_64_32S { R_X86_64_32 } else { rel_type }
    }

    /* pushq GOT+8(%rip); jmpq *GOT+16(%rip); padding */
    fn write_plt_header(&self, buf: &mut [u8], gotplt_va: u64, plt_va: u64)
    {
        buf[0] = 0xff; buf[1] = 0x35;
        buf[6] = 0xff; buf[7] = 0x25;
        buf[12] = 0x0f; buf[13] = 0x1f; buf[14] = 0x40; buf[15] = 0x00;

        let push_disp = (gotplt_va + 8).wrapping_sub(plt_va + 6) as u32;
        let jmp_disp = (gotplt_va + 16).wrapping_sub(plt_va + 12) as u32;
        buf[2..6].copy_from_slice(&push_disp.to_le_bytes());
        buf[8..12].copy_from_slice(&jmp_disp.to_le_bytes());
    }

    /* the first jump through an unbound slot must land on the pushq
       that follows the entry's opening jmpq */
    fn got_plt_entry_value(&self, plt_entry_va: u64) -> u64
    {
        plt_entry_va + 6
    }

    /* jmpq *slot(%rip); pushq <index>; jmp plt[0] */
    fn write_plt_entry(&self, buf: &mut [u8], got_entry_va: u64, plt_entry_va: u64, index: u32)
    {
        buf[0] = 0xff; buf[1] = 0x25;
        let jmp_disp = got_entry_va.wrapping_sub(plt_entry_va + 6) as u32;
        buf[2..6].copy_from_slice(&jmp_disp.to_le_bytes());

        buf[6] = 0x68;
        buf[7..11].copy_from_slice(&index.to_le_bytes());

        buf[11] = 0xe9;
        let plt_start = plt_entry_va - self.plt_header_size() - (index as u64) * self.plt_entry_size();
        let back_disp = plt_start.wrapping_sub(plt_entry_va + 16) as u32;
        buf[12..16].copy_from_slice(&back_disp.to_le_bytes());
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use super::super::symbols::{ Symbol, SymbolKind };
    use goblin::elf::sym::STT_FUNC;

    #[test]
    fn test_x86_64_classification()
    {
        let target = X86_64;
        assert!(target.needs_got(R_X86_64_GOTPCREL, &Symbol::new("x", SymbolKind::Ignored)));
        assert!(target.is_tls_global_dynamic(R_X86_64_TLSGD));
        assert!(target.is_tls_local_dynamic(R_X86_64_TLSLD));
        assert!(target.is_rel_relative(R_X86_64_PC32));
        assert!(target.is_size_rel(R_X86_64_SIZE64));
        assert!(!target.can_relax_tls(R_X86_64_TLSGD, true));
        assert!(target.can_relax_tls(R_X86_64_TLSGD, false));
        assert_eq!(target.get_dyn_rel(R_X86_64_32S), R_X86_64_32);
    }

    #[test]
    fn test_plt_need()
    {
        let target = X86_64;
        let mut shared_func = Symbol::new("puts", SymbolKind::Shared { file: 0, value: 0, align: 16 });
        shared_func.sym_type = STT_FUNC;
        assert_eq!(target.needs_plt(R_X86_64_PLT32, &shared_func, true), PltNeed::Explicit);
        assert_eq!(target.needs_plt(R_X86_64_PC32, &shared_func, true), PltNeed::Implicit);

        let local = Symbol::new("f", SymbolKind::Defined { file: 0, section: 0, value: 0 });
        assert_eq!(target.needs_plt(R_X86_64_PC32, &local, false), PltNeed::No);
    }

    #[test]
    fn test_plt_entry_encoding()
    {
        let target = X86_64;
        let mut buf = [0u8; 16];
        target.write_plt_entry(&mut buf, 0x404018, 0x401030, 1);
        assert_eq!(buf[0], 0xff);
        assert_eq!(buf[1], 0x25);
        assert_eq!(buf[6], 0x68);
        assert_eq!(u32::from_le_bytes(buf[7..11].try_into().unwrap()), 1);
    }
}
