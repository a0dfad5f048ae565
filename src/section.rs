/* Organize input sections into output sections
 *
 * Output sections either aggregate input sections that share a
 * (name, type, flags, alignment-class) key, or synthesize their own
 * content (tables, stubs, headers). The factory owns the keying rule;
 * the ordering comparator at the bottom decides the final section order
 * the segments are built over.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::cmp::Ordering;

use indexmap::IndexMap;
use goblin::elf::header::{ EM_X86_64, EM_PPC64 };
use goblin::elf::section_header::{ SHT_NOBITS, SHT_PROGBITS, SHT_INIT_ARRAY, SHT_FINI_ARRAY, SHT_PREINIT_ARRAY };

use super::config::Config;
use super::elf::{ self, align_to };
use super::input::{ InputSection, SectionKind, SectionRef };
use super::script::ScriptOracle;

pub type SecId = usize;

/* the synthesized sections the writer can own */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Synth
{
    ElfHeader,        /* pseudo-section covering the ELF header */
    ProgramHeaders,   /* pseudo-section covering the phdr table */
    Interp,
    Got,
    GotPlt,
    Plt,
    RelaDyn,
    RelaPlt,
    Dynamic,
    DynSymTab,
    DynStrTab,
    SymTab,
    StrTab,
    HashTab,
    GnuHashTab,
    EhFrameHdr,
    MipsRldMap
}

/* a placed slice of an input section */
#[derive(Clone, Copy)]
pub struct Contribution
{
    pub sec: SectionRef,
    pub offset: u64
}

pub enum Content
{
    Aggregate { kind: SectionKind, inputs: Vec<Contribution> },
    Synthetic(Synth)
}

pub struct OutputSection
{
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub align: u64,
    pub entsize: u64,
    pub link: u32,
    pub info: u32,
    pub size: u64,
    pub file_off: u64,
    pub va: u64,
    pub shndx: u32,     /* assigned after ordering; 0 = not in the table */
    pub content: Content
}

impl OutputSection
{
    pub fn new(name: &str, sh_type: u32, flags: u64, kind: SectionKind) -> OutputSection
    {
        OutputSection
        {
            name: String::from(name),
            sh_type,
            flags,
            align: 1,
            entsize: 0,
            link: 0,
            info: 0,
            size: 0,
            file_off: 0,
            va: 0,
            shndx: 0,
            content: Content::Aggregate { kind, inputs: Vec::new() }
        }
    }

    pub fn synthetic(name: &str, sh_type: u32, flags: u64, which: Synth) -> OutputSection
    {
        let mut section = OutputSection::new(name, sh_type, flags, SectionKind::Regular);
        section.content = Content::Synthetic(which);
        section
    }

    pub fn synth_kind(&self) -> Option<Synth>
    {
        match self.content
        {
            Content::Synthetic(which) => Some(which),
            _ => None
        }
    }

    /* alignment only ever grows as contributors arrive */
    pub fn update_align(&mut self, align: u64)
    {
        if align > self.align
        {
            self.align = align;
        }
    }

    /* take an input section into this output section, returning the
       offset it was placed at */
    pub fn add_input(&mut self, sec_ref: SectionRef, input: &InputSection) -> u64
    {
        self.update_align(input.align);
        let offset = align_to(self.size, input.align.max(1));
        self.size = offset + input.size;

        match &mut self.content
        {
            Content::Aggregate { inputs, .. } => inputs.push(Contribution { sec: sec_ref, offset }),
            Content::Synthetic(_) => fatal_msg!("Input section {} fed to synthesized output {}", input.name, self.name)
        }

        offset
    }

    pub fn is_alloc(&self) -> bool { self.flags & elf::SHF_ALLOC != 0 }
    pub fn is_writable(&self) -> bool { self.flags & elf::SHF_WRITE != 0 }
    pub fn is_exec(&self) -> bool { self.flags & elf::SHF_EXECINSTR != 0 }
    pub fn is_tls(&self) -> bool { self.flags & elf::SHF_TLS != 0 }
    pub fn is_nobits(&self) -> bool { self.sh_type == SHT_NOBITS }

    /* TLS NOBITS sections take no space in any PT_LOAD; only PT_TLS
       accounts for them */
    pub fn needs_pt_load(&self) -> bool
    {
        self.is_alloc() && !(self.is_tls() && self.is_nobits())
    }
}

/* rewrite an input section name to its output home: the script oracle
   wins, then the usual per-function/per-data prefixes collapse */
pub fn output_section_name(script: &dyn ScriptOracle, input_name: &str) -> String
{
    if let Some(name) = script.output_section_name(input_name)
    {
        return name;
    }

    for prefix in [ ".text.", ".rodata.", ".data.rel.ro.", ".data.", ".bss.",
                    ".init_array.", ".fini_array.", ".ctors.", ".dtors.",
                    ".tbss.", ".gcc_except_table.", ".tdata." ]
    {
        if input_name.starts_with(prefix)
        {
            return String::from(&prefix[..prefix.len() - 1]);
        }
    }

    String::from(input_name)
}

/* the factory key. two input sections share an output section exactly
   when these match */
#[derive(Clone, PartialEq, Eq, Hash)]
struct SectionKey
{
    name: String,
    sh_type: u32,
    flags: u64,
    align: u64
}

pub struct SectionFactory
{
    map: IndexMap<SectionKey, SecId>
}

impl SectionFactory
{
    pub fn new() -> SectionFactory
    {
        SectionFactory { map: IndexMap::new() }
    }

    fn create_key(input: &InputSection, out_name: &str, e_machine: u16) -> SectionKey
    {
        /* the group flag is a property of the input, not the output */
        let flags = input.flags & !elf::SHF_GROUP;

        /* mergeable sections with different alignments must not be
           interleaved, so the alignment becomes part of the key */
        let align = match input.kind
        {
            SectionKind::Merge => input.align.max(input.entsize),
            _ => 0
        };

        /* GNU as gives .eh_frame either SHT_PROGBITS or the x86-64
           unwind type depending on the construct; fold to one */
        let mut sh_type = input.sh_type;
        if sh_type == SHT_PROGBITS && e_machine == EM_X86_64 && input.kind == SectionKind::EhFrame
        {
            sh_type = elf::SHT_X86_64_UNWIND;
        }

        SectionKey { name: String::from(out_name), sh_type, flags, align }
    }

    /* find or create the output section for an input section. returns
       the section id and whether it was newly made */
    pub fn create(&mut self, sections: &mut Vec<OutputSection>, input: &InputSection,
                  out_name: &str, e_machine: u16) -> (SecId, bool)
    {
        let key = SectionFactory::create_key(input, out_name, e_machine);
        if let Some(id) = self.map.get(&key)
        {
            return (*id, false);
        }

        let id = sections.len();
        sections.push(OutputSection::new(&key.name, key.sh_type, key.flags, input.kind));
        self.map.insert(key, id);
        (id, true)
    }

    /* locate a singleton created during assembly, e.g. .bss or .opd */
    pub fn lookup(&self, name: &str, sh_type: u32, flags: u64) -> Option<SecId>
    {
        self.map.get(&SectionKey { name: String::from(name), sh_type, flags, align: 0 }).copied()
    }
}

/* would the dynamic loader re-protect this section read-only once
   relocation is done? */
pub fn is_relro(config: &Config, section: &OutputSection) -> bool
{
    if !config.z_relro
    {
        return false;
    }
    if !section.is_alloc() || !section.is_writable()
    {
        return false;
    }
    if section.is_tls()
    {
        return true;
    }
    if matches!(section.sh_type, SHT_INIT_ARRAY | SHT_FINI_ARRAY | SHT_PREINIT_ARRAY)
    {
        return true;
    }
    match section.synth_kind()
    {
        Some(Synth::GotPlt) => return config.z_now,
        Some(Synth::Dynamic) | Some(Synth::Got) => return true,
        _ => ()
    }
    matches!(section.name.as_str(), ".data.rel.ro" | ".ctors" | ".dtors" | ".jcr" | ".eh_frame")
}

/* PPC64 keeps its TOC-addressed sections bunched so a signed 16-bit
   offset from the TOC pointer reaches them */
fn ppc64_section_rank(name: &str) -> i32
{
    match name
    {
        ".tocbss" => 0,
        ".branch_lt" => 2,
        ".toc" => 3,
        ".toc1" => 4,
        ".opd" => 5,
        _ => 1
    }
}

/* the total order the output sections are stable-sorted by */
pub fn compare_sections(a: &OutputSection, b: &OutputSection,
                        config: &Config, script: &dyn ScriptOracle) -> Ordering
{
    /* a script's SECTIONS order overrides everything */
    let scripted = script.compare_sections(&a.name, &b.name);
    if scripted != 0
    {
        return if scripted < 0 { Ordering::Less } else { Ordering::Greater };
    }

    /* allocatable sections first, so debug info doesn't push loadable
       addresses around */
    if a.is_alloc() != b.is_alloc()
    {
        return if a.is_alloc() { Ordering::Less } else { Ordering::Greater };
    }

    /* no constraints among the non-allocatable */
    if !a.is_alloc()
    {
        return Ordering::Equal;
    }

    /* read-only before writable: the RO load segment covers the file
       header at offset zero */
    if a.is_writable() != b.is_writable()
    {
        return if b.is_writable() { Ordering::Less } else { Ordering::Greater };
    }

    /* and non-executable before executable for the same reason */
    if a.is_exec() != b.is_exec()
    {
        return if b.is_exec() { Ordering::Less } else { Ordering::Greater };
    }

    /* from here both live in the same PT_LOAD */

    /* the TLS initialization image must be one contiguous block, and
       TLS NOBITS cost no address space, so TLS comes first */
    if a.is_tls() != b.is_tls()
    {
        return if a.is_tls() { Ordering::Less } else { Ordering::Greater };
    }

    /* NOBITS last: the loader zeroes the tail of the segment where
       p_memsz outruns p_filesz */
    if a.is_nobits() != b.is_nobits()
    {
        return if b.is_nobits() { Ordering::Less } else { Ordering::Greater };
    }

    /* RELRO sections ahead of plain read-write */
    let a_relro = is_relro(config, a);
    let b_relro = is_relro(config, b);
    if a_relro != b_relro
    {
        return if a_relro { Ordering::Less } else { Ordering::Greater };
    }

    if config.e_machine == EM_PPC64
    {
        return ppc64_section_rank(&a.name).cmp(&ppc64_section_rank(&b.name));
    }

    Ordering::Equal
}

/* is this name usable as a C identifier? if so the runtime may expect
   __start_/__stop_ bracket symbols for the section */
pub fn is_valid_c_identifier(name: &str) -> bool
{
    let mut chars = name.chars();
    match chars.next()
    {
        Some(first) if first == '_' || first.is_ascii_alphabetic() => (),
        _ => return false
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}
