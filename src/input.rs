/* Describe the parsed input files the writer consumes
 *
 * The writer does not parse objects itself; the loader stages hand it a
 * LinkInputs describing every object and shared library, with symbol
 * resolution already complete. Input sections are borrowed: they are
 * assigned to output sections during assembly and never modified.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cell::Cell;

use super::symbols::SymbolId;

/* identify an input section as (object file index, section index) */
pub type SectionRef = (usize, usize);

/* how an input section's bytes are treated during assembly */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SectionKind
{
    Regular,
    EhFrame,
    Merge,
    MipsReginfo
}

/* one relocation entry, presented uniformly whether the input section
   carried SHT_REL or SHT_RELA records. REL entries have a zero addend
   here; the in-place addend is the relocation applier's business */
#[derive(Clone, Copy)]
pub struct RelocEntry
{
    pub offset: u64,
    pub sym_index: u32,
    pub rel_type: u32,
    pub addend: i64
}

/* a run of relocations against one input section */
pub struct RelocBatch
{
    pub is_rela: bool,
    pub entries: Vec<RelocEntry>
}

/* a contiguous chunk of bytes from an input object */
pub struct InputSection
{
    pub name: String,
    pub kind: SectionKind,
    pub sh_type: u32,
    pub flags: u64,
    pub align: u64,
    pub entsize: u64,
    pub size: u64,          /* data.len() except for SHT_NOBITS */
    pub data: Vec<u8>,      /* empty for SHT_NOBITS */
    pub live: bool,         /* cleared by the garbage collector */
    pub relocs: Vec<RelocBatch>
}

impl InputSection
{
    pub fn new(name: &str, sh_type: u32, flags: u64, align: u64, data: Vec<u8>) -> InputSection
    {
        InputSection
        {
            name: String::from(name),
            kind: SectionKind::Regular,
            sh_type,
            flags,
            align,
            entsize: 0,
            size: data.len() as u64,
            data,
            live: true,
            relocs: Vec::new()
        }
    }

    /* describe a section with no file-backed bytes (.bss and kin) */
    pub fn new_nobits(name: &str, flags: u64, align: u64, size: u64) -> InputSection
    {
        let mut section = InputSection::new(name, goblin::elf::section_header::SHT_NOBITS, flags, align, Vec::new());
        section.size = size;
        section
    }

    pub fn is_nobits(&self) -> bool
    {
        self.sh_type == goblin::elf::section_header::SHT_NOBITS
    }
}

/* how a relocation's symbol index resolves within its object file:
   index 0 is the null entry, small indices are file-local symbols, and
   the rest map into the resolved global symbol table */
#[derive(Clone, Copy)]
pub enum SymSlot
{
    Null,
    Local(usize),        /* index into ObjectFile.locals */
    Global(SymbolId)
}

/* a local symbol kept with its object file; these never take part in
   resolution but may be copied into .symtab */
pub struct LocalSymbol
{
    pub name: String,
    pub value: u64,
    pub size: u64,
    pub sym_type: u8,
    pub section: Option<usize>   /* None = absolute, value stands alone */
}

/* a parsed relocatable object */
pub struct ObjectFile
{
    pub name: String,
    pub sections: Vec<InputSection>,
    pub locals: Vec<LocalSymbol>,
    pub symbols: Vec<SymSlot>,   /* full input symtab order, for reloc lookups */
    pub e_machine: u16,
    pub os_abi: u8,
    pub e_flags: u32
}

impl ObjectFile
{
    pub fn new(name: &str) -> ObjectFile
    {
        ObjectFile
        {
            name: String::from(name),
            sections: Vec::new(),
            locals: Vec::new(),
            symbols: vec![ SymSlot::Null ],
            e_machine: 0,
            os_abi: 0,
            e_flags: 0
        }
    }

    pub fn symbol_for(&self, index: u32) -> SymSlot
    {
        match self.symbols.get(index as usize)
        {
            Some(slot) => *slot,
            None => SymSlot::Null
        }
    }
}

/* a shared library whose symbols took part in resolution. the writer
   marks a library used when a relocation actually binds to it, which
   feeds both DT_NEEDED and --as-needed decisions upstream */
pub struct SharedFile
{
    pub name: String,
    pub soname: String,
    pub is_used: Cell<bool>
}

impl SharedFile
{
    pub fn new(name: &str, soname: &str) -> SharedFile
    {
        SharedFile
        {
            name: String::from(name),
            soname: String::from(soname),
            is_used: Cell::new(false)
        }
    }
}

/* everything the loader stages produced for one link */
pub struct LinkInputs
{
    pub objects: Vec<ObjectFile>,
    pub shared: Vec<SharedFile>
}

impl LinkInputs
{
    pub fn new() -> LinkInputs
    {
        LinkInputs { objects: Vec::new(), shared: Vec::new() }
    }

    pub fn section(&self, sec_ref: SectionRef) -> &InputSection
    {
        &self.objects[sec_ref.0].sections[sec_ref.1]
    }

    /* the identification bytes of the output are copied from the first
       object on the command line, as GNU linkers do */
    pub fn first_elf(&self) -> Option<&ObjectFile>
    {
        self.objects.first()
    }
}
