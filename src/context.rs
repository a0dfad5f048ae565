/* Centralize all the context about the image being assembled
 *
 * The OutputImage is the one mutable structure the pipeline stages pass
 * between them: the arena of output sections, the synthesized table
 * contents, the program headers, and the bookkeeping that ties symbols
 * and input sections to their final homes. Each stage owns the fields
 * it populates; later stages treat them as read-only.
 *
 * Sections live in an arena and are referred to by index (SecId), so
 * the ordered section list can be sorted without disturbing anything
 * that holds a reference.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashMap;

use object::endian::Endianness;
use goblin::elf::header::EM_MIPS;
use goblin::elf::section_header::{ SHT_DYNAMIC, SHT_DYNSYM, SHT_GNU_HASH, SHT_HASH,
                                   SHT_PROGBITS, SHT_REL, SHT_RELA, SHT_STRTAB, SHT_SYMTAB };

use super::config::Config;
use super::dynamic::{ DynamicSection, RelocSection, rela_dyn_name, rela_plt_name };
use super::elf::{ self, ElfClass };
use super::got::{ GotSection, GotPltSection, PltSection };
use super::input::{ LinkInputs, SectionRef };
use super::section::{ OutputSection, SecId, Synth };
use super::symbols::{ Anchor, SymbolId, SymbolKind, SymbolTable };
use super::tables::{ StringTable, SymTabSection };
use super::target::TargetOracle;

/* how a link can fail out from under the writer */
#[derive(Debug)]
pub enum LinkError
{
    Io { filename: String, reason: std::io::Error },
    Emit { filename: String, reason: String },
    UndefinedSymbols { messages: Vec<String> }
}

impl std::fmt::Display for LinkError
{
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result
    {
        match self
        {
            LinkError::Io { filename, reason } =>
                write!(f, "can't write {}: {}", filename, reason),
            LinkError::Emit { filename, reason } =>
                write!(f, "can't assemble {}: {}", filename, reason),
            LinkError::UndefinedSymbols { messages } =>
                write!(f, "{} undefined symbol(s)", messages.len())
        }
    }
}

impl std::error::Error for LinkError {}

/* a program header entry: type, access flags, and the range of output
   sections it covers. file and memory extents are filled in once
   addresses are assigned */
pub struct Phdr
{
    pub p_type: u32,
    pub p_flags: u32,
    pub p_align: u64,
    pub p_offset: u64,
    pub p_vaddr: u64,
    pub p_filesz: u64,
    pub p_memsz: u64,
    pub first: Option<SecId>,
    pub last: Option<SecId>
}

impl Phdr
{
    pub fn new(p_type: u32, p_flags: u32) -> Phdr
    {
        Phdr
        {
            p_type,
            p_flags,
            p_align: 0,
            p_offset: 0,
            p_vaddr: 0,
            p_filesz: 0,
            p_memsz: 0,
            first: None,
            last: None
        }
    }

    pub fn add_section(&mut self, id: SecId, section: &OutputSection)
    {
        self.last = Some(id);
        if self.first.is_none()
        {
            self.first = Some(id);
        }
        if section.align > self.p_align
        {
            self.p_align = section.align;
        }
    }
}

/* reserved symbols whose values are patched once layout is done */
pub struct ReservedSymbols
{
    pub end: Vec<SymbolId>,      /* _end and its alias */
    pub etext: Vec<SymbolId>,
    pub edata: Vec<SymbolId>,
    pub rela_iplt_start: Option<SymbolId>,
    pub rela_iplt_end: Option<SymbolId>,
    pub mips_gp: Option<SymbolId>
}

pub struct OutputImage
{
    pub class: ElfClass,
    pub endian: Endianness,
    pub is_dynamic: bool,

    /* the section arena and the ordered list actually in the image */
    pub sections: Vec<OutputSection>,
    pub order: Vec<SecId>,

    /* where every assigned input section landed */
    pub section_map: HashMap<SectionRef, (SecId, u64)>,

    /* pseudo-sections for the file and program headers */
    pub elf_header: SecId,
    pub program_headers: Option<SecId>,

    /* singleton section ids; Some() once created, but only present in
       the image if they also made it into `order` */
    pub interp: Option<SecId>,
    pub got_sec: SecId,
    pub gotplt_sec: Option<SecId>,
    pub plt_sec: SecId,
    pub rela_dyn_sec: SecId,
    pub rela_plt_sec: Option<SecId>,
    pub dynamic_sec: SecId,
    pub dynsym_sec: SecId,
    pub dynstr_sec: SecId,
    pub symtab_sec: Option<SecId>,
    pub strtab_sec: Option<SecId>,
    pub hash_sec: Option<SecId>,
    pub gnu_hash_sec: Option<SecId>,
    pub eh_frame_hdr_sec: SecId,
    pub rld_map_sec: Option<SecId>,

    /* aggregates bound after assembly */
    pub bss: Option<SecId>,
    pub opd: Option<SecId>,
    pub eh_frame: Option<SecId>,
    pub preinit_array: Option<SecId>,
    pub init_array: Option<SecId>,
    pub fini_array: Option<SecId>,

    /* synthesized contents */
    pub got: GotSection,
    pub gotplt: Option<GotPltSection>,
    pub plt: PltSection,
    pub rela_dyn: RelocSection,
    pub rela_plt: Option<RelocSection>,
    pub dynamic: DynamicSection,
    pub dynsym: SymTabSection,
    pub dynstr: StringTable,
    pub symtab: Option<SymTabSection>,
    pub strtab: Option<StringTable>,
    pub hash_data: Vec<u8>,
    pub gnu_hash_data: Vec<u8>,
    pub eh_frame_hdr_live: bool,

    /* PLT geometry, fixed by the target oracle up front */
    pub plt_header_size: u64,
    pub plt_entry_size: u64,

    /* program headers and the final extents. the file totals are
       settled during emit, once the section-name table is sized */
    pub phdrs: Vec<Phdr>,
    pub tls_phdr: Option<usize>,
    pub file_size: u64,
    pub shdr_off: u64,
    pub end_va: u64,   /* first address past the data segment */

    /* a GOT-relative relocation forces .got into the image even when
       no slot was claimed */
    pub has_got_off_rel: bool,

    pub reserved: ReservedSymbols,

    /* collected diagnostics; any error stops the link before layout */
    pub errors: Vec<String>,
    pub warnings: Vec<String>
}

impl OutputImage
{
    pub fn new(config: &Config, target: &dyn TargetOracle, inputs: &LinkInputs) -> OutputImage
    {
        let class = config.class;
        let word = class.word_size();
        let is_dynamic = !inputs.shared.is_empty() || config.shared;
        let reloc_type = if class.uses_rela() { SHT_RELA } else { SHT_REL };

        let mut sections = Vec::new();
        let mut add = |section: OutputSection| -> SecId
        {
            sections.push(section);
            sections.len() - 1
        };

        /* the two pseudo-sections the first load segment covers */
        let elf_header = add(OutputSection::synthetic("", 0, elf::SHF_ALLOC, Synth::ElfHeader));
        let program_headers =
        {
            let mut section = OutputSection::synthetic("", 0, elf::SHF_ALLOC, Synth::ProgramHeaders);
            section.align = word;
            if config.relocatable { None } else { Some(add(section)) }
        };

        /* singletons every link might need */
        let got_sec =
        {
            let mut section = OutputSection::synthetic(".got", SHT_PROGBITS,
                elf::SHF_ALLOC | elf::SHF_WRITE, Synth::Got);
            section.align = word;
            add(section)
        };
        let plt_sec =
        {
            let mut section = OutputSection::synthetic(".plt", SHT_PROGBITS,
                elf::SHF_ALLOC | elf::SHF_EXECINSTR, Synth::Plt);
            section.align = 16;
            add(section)
        };
        let rela_dyn_sec =
        {
            let mut section = OutputSection::synthetic(rela_dyn_name(class), reloc_type,
                elf::SHF_ALLOC, Synth::RelaDyn);
            section.align = word;
            section.entsize = class.reloc_size();
            add(section)
        };
        let dynamic_sec =
        {
            let mut section = OutputSection::synthetic(".dynamic", SHT_DYNAMIC,
                elf::SHF_ALLOC | elf::SHF_WRITE, Synth::Dynamic);
            section.align = word;
            section.entsize = class.dyn_size();
            add(section)
        };
        let dynsym_sec =
        {
            let mut section = OutputSection::synthetic(".dynsym", SHT_DYNSYM,
                elf::SHF_ALLOC, Synth::DynSymTab);
            section.align = word;
            section.entsize = class.sym_size();
            add(section)
        };
        let dynstr_sec = add(OutputSection::synthetic(".dynstr", SHT_STRTAB,
            elf::SHF_ALLOC, Synth::DynStrTab));
        let eh_frame_hdr_sec =
        {
            let mut section = OutputSection::synthetic(".eh_frame_hdr", SHT_PROGBITS,
                elf::SHF_ALLOC, Synth::EhFrameHdr);
            section.align = 4;
            add(section)
        };

        /* optional singletons, configuration permitting */
        let interp = match (&config.dynamic_linker, inputs.shared.is_empty())
        {
            (Some(_), false) => Some(add(OutputSection::synthetic(".interp", SHT_PROGBITS,
                elf::SHF_ALLOC, Synth::Interp))),
            _ => None
        };
        let (gotplt_sec, rela_plt_sec) = if target.use_lazy_binding()
        {
            let mut gotplt = OutputSection::synthetic(".got.plt", SHT_PROGBITS,
                elf::SHF_ALLOC | elf::SHF_WRITE, Synth::GotPlt);
            gotplt.align = word;
            let mut relaplt = OutputSection::synthetic(rela_plt_name(class), reloc_type,
                elf::SHF_ALLOC, Synth::RelaPlt);
            relaplt.align = word;
            relaplt.entsize = class.reloc_size();
            (Some(add(gotplt)), Some(add(relaplt)))
        }
        else
        {
            (None, None)
        };
        let (symtab_sec, strtab_sec) = if config.strip_all
        {
            (None, None)
        }
        else
        {
            let mut symtab = OutputSection::synthetic(".symtab", SHT_SYMTAB, 0, Synth::SymTab);
            symtab.align = word;
            symtab.entsize = class.sym_size();
            (Some(add(symtab)),
             Some(add(OutputSection::synthetic(".strtab", SHT_STRTAB, 0, Synth::StrTab))))
        };
        let hash_sec = if config.sysv_hash
        {
            let mut section = OutputSection::synthetic(".hash", SHT_HASH, elf::SHF_ALLOC, Synth::HashTab);
            section.align = 4;
            section.entsize = 4;
            Some(add(section))
        }
        else
        {
            None
        };
        let gnu_hash_sec = if config.gnu_hash
        {
            let mut section = OutputSection::synthetic(".gnu.hash", SHT_GNU_HASH,
                elf::SHF_ALLOC, Synth::GnuHashTab);
            section.align = word;
            Some(add(section))
        }
        else
        {
            None
        };

        /* MIPS executables reserve a word the loader points
           DT_MIPS_RLD_MAP at */
        let rld_map_sec = if config.e_machine == EM_MIPS && !config.shared
        {
            let mut section = OutputSection::synthetic(".rld_map", SHT_PROGBITS,
                elf::SHF_ALLOC | elf::SHF_WRITE, Synth::MipsRldMap);
            section.align = word;
            section.size = word;
            Some(add(section))
        }
        else
        {
            None
        };

        OutputImage
        {
            class,
            endian: config.byte_order.to_endianness(),
            is_dynamic,
            sections,
            order: Vec::new(),
            section_map: HashMap::new(),
            elf_header,
            program_headers,
            interp,
            got_sec,
            gotplt_sec,
            plt_sec,
            rela_dyn_sec,
            rela_plt_sec,
            dynamic_sec,
            dynsym_sec,
            dynstr_sec,
            symtab_sec,
            strtab_sec,
            hash_sec,
            gnu_hash_sec,
            eh_frame_hdr_sec,
            rld_map_sec,
            bss: None,
            opd: None,
            eh_frame: None,
            preinit_array: None,
            init_array: None,
            fini_array: None,
            got: GotSection::new(),
            gotplt: if target.use_lazy_binding() { Some(GotPltSection::new()) } else { None },
            plt: PltSection::new(),
            rela_dyn: RelocSection::new(),
            rela_plt: if target.use_lazy_binding() { Some(RelocSection::new()) } else { None },
            dynamic: DynamicSection::new(),
            dynsym: SymTabSection::new(),
            dynstr: StringTable::new(),
            symtab: if config.strip_all { None } else { Some(SymTabSection::new()) },
            strtab: if config.strip_all { None } else { Some(StringTable::new()) },
            hash_data: Vec::new(),
            gnu_hash_data: Vec::new(),
            eh_frame_hdr_live: false,
            plt_header_size: target.plt_header_size(),
            plt_entry_size: target.plt_entry_size(),
            phdrs: Vec::new(),
            tls_phdr: None,
            file_size: 0,
            shdr_off: 0,
            end_va: 0,
            has_got_off_rel: false,
            reserved: ReservedSymbols
            {
                end: Vec::new(),
                etext: Vec::new(),
                edata: Vec::new(),
                rela_iplt_start: None,
                rela_iplt_end: None,
                mips_gp: None
            },
            errors: Vec::new(),
            warnings: Vec::new()
        }
    }

    pub fn sec(&self, id: SecId) -> &OutputSection { &self.sections[id] }
    pub fn sec_mut(&mut self, id: SecId) -> &mut OutputSection { &mut self.sections[id] }

    /* add a freshly made section to the arena */
    pub fn add_section(&mut self, section: OutputSection) -> SecId
    {
        self.sections.push(section);
        self.sections.len() - 1
    }

    /* number of pseudo-sections leading the ordered list */
    pub fn dummy_sections_num(&self) -> usize
    {
        if self.program_headers.is_some() { 2 } else { 1 }
    }

    /* entries the image itself orders in the section header table, the
       null entry included; the emitter's section-name table adds one
       more on top */
    pub fn num_shdrs(&self) -> u64
    {
        (self.order.len() + 1 - self.dummy_sections_num()) as u64
    }

    /* the real (non-pseudo) sections, in image order */
    pub fn real_sections(&self) -> &[SecId]
    {
        &self.order[self.dummy_sections_num()..]
    }

    pub fn error(&mut self, message: String)
    {
        eprintln!("{}", message);
        self.errors.push(message);
    }

    pub fn warning(&mut self, message: String)
    {
        eprintln!("warning: {}", message);
        self.warnings.push(message);
    }

    /* lazily make .bss for commons and copy relocations */
    pub fn get_bss(&mut self) -> SecId
    {
        if let Some(id) = self.bss
        {
            return id;
        }
        let section = OutputSection::new(".bss", goblin::elf::section_header::SHT_NOBITS,
            elf::SHF_ALLOC | elf::SHF_WRITE, super::input::SectionKind::Regular);
        let id = self.add_section(section);
        self.order.push(id);
        self.bss = Some(id);
        id
    }

    /* the spot an assigned input section landed at, as an address */
    pub fn spot_va(&self, sec_ref: SectionRef, offset: u64) -> u64
    {
        match self.section_map.get(&sec_ref)
        {
            Some((sec, base)) => self.sections[*sec].va + base + offset,
            None => 0
        }
    }

    /* ...and as a file offset */
    pub fn spot_file_off(&self, sec_ref: SectionRef, offset: u64) -> u64
    {
        match self.section_map.get(&sec_ref)
        {
            Some((sec, base)) => self.sections[*sec].file_off + base + offset,
            None => 0
        }
    }

    /* PPC64 addresses its TOC through a biased pointer into .got */
    pub fn ppc64_toc_base(&self) -> u64
    {
        self.sec(self.got_sec).va.wrapping_add(0x8000)
    }

    /* a symbol's final address. shared functions referenced by address
       answer with their PLT entry; copy-relocated data answers with its
       .bss home */
    pub fn symbol_va(&self, symtab: &SymbolTable, id: SymbolId) -> u64
    {
        let sym = symtab.get(id);
        match sym.kind
        {
            SymbolKind::Defined { file, section, value } =>
                match self.section_map.get(&(file, section))
                {
                    Some((sec, base)) => self.sections[*sec].va + base + value,
                    None => 0
                },

            SymbolKind::DefinedAbsolute { value } => value,

            SymbolKind::DefinedCommon { .. } => match (self.bss, sym.offset_in_bss)
            {
                (Some(bss), Some(offset)) => self.sections[bss].va + offset,
                _ => 0
            },

            SymbolKind::Shared { .. } =>
            {
                if sym.needs_copy()
                {
                    if let (Some(bss), Some(offset)) = (self.bss, sym.offset_in_bss)
                    {
                        return self.sections[bss].va + offset;
                    }
                }
                if sym.needs_copy_or_plt_addr && sym.is_func()
                {
                    if let Some(index) = sym.plt_index
                    {
                        return self.sec(self.plt_sec).va
                            + self.plt.entry_offset(index, self.plt_header_size, self.plt_entry_size);
                    }
                }
                0
            },

            SymbolKind::Synthetic { section, anchor } =>
            {
                let sec = self.sec(section);
                match anchor
                {
                    Anchor::Start => sec.va,
                    Anchor::End => sec.va + sec.size
                }
            },

            SymbolKind::Undefined { .. } | SymbolKind::Ignored => 0
        }
    }

    /* the st_shndx a symbol reports in the emitted tables */
    pub fn symbol_shndx(&self, symtab: &SymbolTable, id: SymbolId) -> u16
    {
        let sym = symtab.get(id);
        match sym.kind
        {
            SymbolKind::Defined { file, section, .. } =>
                match self.section_map.get(&(file, section))
                {
                    Some((sec, _)) => self.sections[*sec].shndx as u16,
                    None => elf::SHN_UNDEF
                },

            SymbolKind::DefinedAbsolute { .. } => elf::SHN_ABS,

            SymbolKind::DefinedCommon { .. } | SymbolKind::Shared { .. } =>
            {
                if (matches!(sym.kind, SymbolKind::DefinedCommon { .. }) || sym.needs_copy())
                    && self.bss.is_some()
                {
                    return self.sections[self.bss.unwrap()].shndx as u16;
                }
                elf::SHN_UNDEF
            },

            SymbolKind::Synthetic { section, .. } => self.sections[section].shndx as u16,

            SymbolKind::Undefined { .. } | SymbolKind::Ignored => elf::SHN_UNDEF
        }
    }
}
