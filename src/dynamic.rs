/* Dynamic relocations and the .dynamic table
 *
 * Relocations destined for the dynamic loader are gathered here while
 * the scan runs, long before any address is known. A relocation's site
 * is therefore symbolic: either a spot inside an output section, or a
 * slot in one of the synthesized tables, resolved to a file address
 * only during emit. The same goes for .dynamic entry values.
 *
 * Gathering these early is what lets the output file be mapped at its
 * final size in one go: the count of dynamic relocations feeds the
 * image size. Writing first and patching later would instead leave a
 * read-only .rela.dyn stranded after the writable sections, costing an
 * extra PT_LOAD even when empty.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use super::elf::ElfClass;
use super::input::SectionRef;
use super::section::SecId;
use super::symbols::SymbolId;

/* where a dynamic relocation's fix-up site lives */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RelocLoc
{
    /* inside an aggregated output section, at an input section spot */
    InSection { section: SectionRef, offset: u64 },

    /* a claimed slot in a synthesized table */
    Got { index: u32 },
    GotPlt { index: u32 },

    /* the .bss home of a copy-relocated symbol */
    Bss { sym: SymbolId },

    /* TLS GOT slots: the image-wide local-dynamic pair, or a symbol's
       general-dynamic module/offset pair */
    LTlsIndex,
    GTlsIndex { sym: SymbolId },
    GTlsOffset { sym: SymbolId }
}

pub struct DynamicReloc
{
    pub rel_type: u32,
    pub loc: RelocLoc,
    pub sym: Option<SymbolId>,

    /* when set, the addend becomes the symbol's final address plus the
       incoming addend, and r_sym is left null (RELATIVE-style) */
    pub use_sym_va: bool,

    pub addend: i64,

    /* a local section-relative target: the addend becomes the spot's
       final address plus the incoming addend */
    pub section_target: Option<(SectionRef, u64)>,

    /* PPC64 R_PPC64_TOC folds the TOC base into the addend; the base is
       only known after layout, so it is folded at emit time */
    pub add_toc_base: bool
}

impl DynamicReloc
{
    /* the common shape: a typed relocation at a site, optionally
       against a symbol */
    pub fn new(rel_type: u32, loc: RelocLoc, sym: Option<SymbolId>) -> DynamicReloc
    {
        DynamicReloc
        {
            rel_type,
            loc,
            sym,
            use_sym_va: false,
            addend: 0,
            section_target: None,
            add_toc_base: false
        }
    }
}

/* a .rela.dyn or .rela.plt in the making (.rel.* on targets without
   explicit addends) */
pub struct RelocSection
{
    pub relocs: Vec<DynamicReloc>,

    /* a static image's .rela.plt holds only IRELATIVE entries applied
       by startup code rather than a loader */
    pub statik: bool
}

impl RelocSection
{
    pub fn new() -> RelocSection
    {
        RelocSection { relocs: Vec::new(), statik: false }
    }

    pub fn add_reloc(&mut self, reloc: DynamicReloc)
    {
        self.relocs.push(reloc);
    }

    pub fn has_relocs(&self) -> bool
    {
        !self.relocs.is_empty()
    }

    pub fn size(&self, class: ElfClass) -> u64
    {
        self.relocs.len() as u64 * class.reloc_size()
    }
}

/* the conventional names, by addend flavor */
pub fn rela_dyn_name(class: ElfClass) -> &'static str
{
    if class.uses_rela() { ".rela.dyn" } else { ".rel.dyn" }
}

pub fn rela_plt_name(class: ElfClass) -> &'static str
{
    if class.uses_rela() { ".rela.plt" } else { ".rel.plt" }
}

/* a .dynamic entry's value, resolved during emit */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DynValue
{
    Plain(u64),
    SectionVa(SecId),
    SectionSize(SecId),
    SymbolVa(SymbolId)
}

pub struct DynEntry
{
    pub tag: u64,
    pub val: DynValue
}

/* the .dynamic table: entries are decided at finalization (so the
   section size is known) and valued at emit */
pub struct DynamicSection
{
    pub entries: Vec<DynEntry>
}

impl DynamicSection
{
    pub fn new() -> DynamicSection
    {
        DynamicSection { entries: Vec::new() }
    }

    pub fn add(&mut self, tag: u64, val: DynValue)
    {
        self.entries.push(DynEntry { tag, val });
    }

    pub fn size(&self, class: ElfClass) -> u64
    {
        self.entries.len() as u64 * class.dyn_size()
    }
}
