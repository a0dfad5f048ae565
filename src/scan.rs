/* Scan every relocation and decide its dynamic consequences
 *
 * This runs before any address exists. Each live, allocatable input
 * section's relocations are classified once: a relocation can demand a
 * GOT or PLT slot, a copy of a shared symbol's storage into .bss, a
 * TLS module/offset pair, or a relocation record the dynamic loader
 * applies at run time. Slots are claimed per symbol, so rescanning the
 * same references changes nothing.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::header::{ EM_MIPS, EM_PPC64 };
use goblin::elf::sym::{ STT_GNU_IFUNC, STT_SECTION };

use super::config::Config;
use super::context::OutputImage;
use super::dynamic::{ DynamicReloc, RelocLoc };
use super::elf::{ R_MIPS_CALL16, R_MIPS_GOT16, R_MIPS_LO16, R_PPC64_RELATIVE, R_PPC64_TOC };
use super::input::{ LinkInputs, RelocBatch, SectionRef, SymSlot };
use super::script::ScriptOracle;
use super::symbols::{ SymbolId, SymbolKind, SymbolTable };
use super::target::{ PltNeed, TargetOracle };

/* walk every live allocatable section of every object */
pub fn scan_relocations(image: &mut OutputImage, inputs: &LinkInputs, symtab: &mut SymbolTable,
                        target: &dyn TargetOracle, script: &dyn ScriptOracle, config: &Config)
{
    for file_idx in 0..inputs.objects.len()
    {
        for sec_idx in 0..inputs.objects[file_idx].sections.len()
        {
            let section = &inputs.objects[file_idx].sections[sec_idx];
            if !section.live || section.flags & super::elf::SHF_ALLOC == 0
            {
                continue;
            }
            if script.is_discarded(&section.name)
            {
                continue;
            }
            for batch in &section.relocs
            {
                scan_batch(image, inputs, symtab, target, config, (file_idx, sec_idx), batch);
            }
        }
    }
}

fn scan_batch(image: &mut OutputImage, inputs: &LinkInputs, symtab: &mut SymbolTable,
              target: &dyn TargetOracle, config: &Config, c_ref: SectionRef, batch: &RelocBatch)
{
    let object = &inputs.objects[c_ref.0];

    for entry in &batch.entries
    {
        let rel_type = entry.rel_type;
        let slot = object.symbol_for(entry.sym_index);
        let body = match slot
        {
            SymSlot::Global(id) => Some(id),
            _ => None
        };

        /* hints exist for optional code optimization only */
        if target.is_hint(rel_type)
        {
            continue;
        }

        /* a GOT-relative reference needs a .got to measure from, even
           an empty one */
        if target.is_got_relative(rel_type)
        {
            image.has_got_off_rel = true;
        }

        /* binding to a library's symbol makes the library needed */
        if let Some(id) = body
        {
            let sym = symtab.get(id);
            if !sym.is_weak()
            {
                if let SymbolKind::Shared { file, .. } = sym.kind
                {
                    inputs.shared[file].is_used.set(true);
                }
            }
        }

        let preemptible = match body
        {
            Some(id) => symtab.get(id).can_be_preempted(config.shared),
            None => false
        };

        if handle_tls_relocation(image, symtab, target, config, rel_type, body, preemptible)
        {
            continue;
        }

        /* some targets want the loader to add the base address on top
           of an already-applied value */
        if target.needs_dyn_relative(rel_type)
        {
            let mut reloc = DynamicReloc::new(target.relative_rel(),
                RelocLoc::InSection { section: c_ref, offset: entry.offset }, body);
            reloc.use_sym_va = true;
            reloc.addend = entry.addend;
            image.rela_dyn.add_reloc(reloc);
        }

        /* MIPS makes GOT entries even for local symbols */
        if config.e_machine == EM_MIPS && !preemptible
            && (rel_type == R_MIPS_GOT16 || rel_type == R_MIPS_CALL16)
        {
            image.got.add_mips_local_entry();
            continue;
        }

        /* a shared symbol's data referenced directly: copy its storage
           into our .bss and tell the loader to fill it */
        if let Some(id) = body
        {
            if symtab.get(id).is_shared()
            {
                if symtab.get(id).needs_copy()
                {
                    continue;   /* already decided on an earlier reference */
                }
                if target.needs_copy_rel(rel_type, symtab.get(id), config.shared)
                {
                    let sym = symtab.get_mut(id);
                    sym.needs_copy_or_plt_addr = true;
                    sym.must_be_in_dynsym = true;
                    image.rela_dyn.add_reloc(DynamicReloc::new(target.copy_rel(),
                        RelocLoc::Bss { sym: id }, Some(id)));
                    continue;
                }
            }
        }

        /* an IFUNC is always reached through the PLT, local or not */
        if let Some(id) = body
        {
            if symtab.get(id).sym_type == STT_GNU_IFUNC
            {
                if symtab.get(id).is_in_plt()
                {
                    continue;
                }
                add_plt_entry(image, symtab, id);
                let rel = if preemptible { target.plt_rel() } else { target.irelative_rel() };
                if target.use_lazy_binding()
                {
                    let index = add_gotplt_entry(image, symtab, id);
                    let mut reloc = DynamicReloc::new(rel, RelocLoc::GotPlt { index }, Some(id));
                    reloc.use_sym_va = !preemptible;
                    push_plt_reloc(image, symtab, reloc);
                }
                else
                {
                    let index = add_got_entry(image, symtab, id);
                    let mut reloc = DynamicReloc::new(rel, RelocLoc::Got { index }, Some(id));
                    reloc.use_sym_va = !preemptible;
                    push_dyn_reloc(image, symtab, reloc);
                }
                continue;
            }
        }

        /* does the relocation want a PLT entry? */
        if let Some(id) = body
        {
            let need = target.needs_plt(rel_type, symtab.get(id), preemptible);
            if need != PltNeed::No
            {
                if need == PltNeed::Implicit
                {
                    /* the PLT entry stands in as the symbol's address */
                    symtab.get_mut(id).needs_copy_or_plt_addr = true;
                }
                if symtab.get(id).is_in_plt()
                {
                    continue;
                }
                add_plt_entry(image, symtab, id);
                if target.use_lazy_binding()
                {
                    let index = add_gotplt_entry(image, symtab, id);
                    push_plt_reloc(image, symtab,
                        DynamicReloc::new(target.plt_rel(), RelocLoc::GotPlt { index }, Some(id)));
                }
                else
                {
                    if symtab.get(id).is_in_got()
                    {
                        continue;
                    }
                    let index = add_got_entry(image, symtab, id);
                    push_dyn_reloc(image, symtab,
                        DynamicReloc::new(target.got_rel(), RelocLoc::Got { index }, Some(id)));
                }
                continue;
            }
        }

        /* does it want a GOT slot? */
        if let Some(id) = body
        {
            if target.needs_got(rel_type, symtab.get(id))
            {
                if symtab.get(id).is_in_got()
                {
                    continue;
                }
                let index = add_got_entry(image, symtab, id);

                if config.e_machine == EM_MIPS
                {
                    /* the MIPS ABI processes GOT entries through the
                       dynamic symbol table, no relocations involved */
                    symtab.get_mut(id).must_be_in_dynsym = true;
                    continue;
                }

                let pic_needs_rel = config.shared && !target.is_rel_relative(rel_type)
                    && !target.is_size_rel(rel_type);
                if preemptible || pic_needs_rel
                {
                    let dyn_type = if preemptible
                    {
                        if symtab.get(id).is_tls { target.tls_got_rel() } else { target.got_rel() }
                    }
                    else
                    {
                        target.relative_rel()
                    };
                    let mut reloc = DynamicReloc::new(dyn_type, RelocLoc::Got { index }, Some(id));
                    reloc.use_sym_va = !preemptible;
                    push_dyn_reloc(image, symtab, reloc);
                }
                continue;
            }
        }

        if config.e_machine == EM_MIPS
        {
            /* the LO16 half of a HI16/GOT16 pair never needs its own
               dynamic work */
            if rel_type == R_MIPS_LO16
            {
                continue;
            }
            /* _gp_disp and __gnu_local_gp measure against the GOT
               pointer; nothing for the loader to do */
            if let Some(id) = body
            {
                let name = symtab.get(id).name.as_str();
                if name == config.mips_gp_disp_symbol || name == config.mips_local_gp_symbol
                {
                    continue;
                }
            }
        }

        /* nothing special, but the symbol may be overridden at run
           time: hand the site to the loader as-is */
        if preemptible
        {
            let mut reloc = DynamicReloc::new(target.get_dyn_rel(rel_type),
                RelocLoc::InSection { section: c_ref, offset: entry.offset }, body);
            reloc.addend = entry.addend;
            push_dyn_reloc(image, symtab, reloc);
            continue;
        }

        /* the symbol is final. a fixed output needs nothing more, and
           neither do references measured by distance or size */
        if !config.shared || target.is_rel_relative(rel_type) || target.is_size_rel(rel_type)
        {
            continue;
        }

        /* position-independent output: the loader adds the base. the
           value can be computed now, so no symbol is named */
        if config.e_machine == EM_PPC64 && rel_type == R_PPC64_TOC
        {
            let mut reloc = DynamicReloc::new(R_PPC64_RELATIVE,
                RelocLoc::InSection { section: c_ref, offset: entry.offset }, None);
            reloc.addend = entry.addend;
            reloc.add_toc_base = true;
            image.rela_dyn.add_reloc(reloc);
            continue;
        }

        if let Some(id) = body
        {
            let mut reloc = DynamicReloc::new(target.relative_rel(),
                RelocLoc::InSection { section: c_ref, offset: entry.offset }, Some(id));
            reloc.use_sym_va = true;
            reloc.addend = entry.addend;
            image.rela_dyn.add_reloc(reloc);
            continue;
        }

        /* a local symbol: point the loader at its section spot. a
           section symbol folds the addend into the offset */
        if let SymSlot::Local(local_idx) = slot
        {
            let local = &object.locals[local_idx];
            if let Some(target_sec) = local.section
            {
                let mut offset = local.value;
                let mut addend = entry.addend;
                if local.sym_type == STT_SECTION
                {
                    offset = offset.wrapping_add(addend as u64);
                    addend = 0;
                }
                let mut reloc = DynamicReloc::new(target.relative_rel(),
                    RelocLoc::InSection { section: c_ref, offset: entry.offset }, None);
                reloc.section_target = Some(((c_ref.0, target_sec), offset));
                reloc.addend = addend;
                image.rela_dyn.add_reloc(reloc);
            }
        }
    }
}

/* TLS accesses get their own decision tree. returns true when the
   relocation is fully dealt with */
fn handle_tls_relocation(image: &mut OutputImage, symtab: &mut SymbolTable,
                         target: &dyn TargetOracle, config: &Config,
                         rel_type: u32, body: Option<SymbolId>, preemptible: bool) -> bool
{
    /* local-dynamic: one module index for the whole image */
    if target.is_tls_local_dynamic(rel_type)
    {
        if target.can_relax_tls(rel_type, config.shared)
        {
            return true;
        }
        if image.got.add_tls_index()
        {
            image.rela_dyn.add_reloc(DynamicReloc::new(target.tls_module_index_rel(),
                RelocLoc::LTlsIndex, None));
        }
        return true;
    }

    let id = match body
    {
        Some(id) if symtab.get(id).is_tls => id,
        _ => return false
    };

    /* general-dynamic: a module/offset pair per symbol */
    if target.is_tls_global_dynamic(rel_type)
    {
        if !target.can_relax_tls(rel_type, config.shared)
        {
            let already = symtab.get(id).dyn_tls_index;
            if let Some(index) = image.got.add_dyn_tls_entry(id, already)
            {
                symtab.get_mut(id).dyn_tls_index = Some(index);
                symtab.get_mut(id).must_be_in_dynsym = true;
                image.rela_dyn.add_reloc(DynamicReloc::new(target.tls_module_index_rel(),
                    RelocLoc::GTlsIndex { sym: id }, Some(id)));
                image.rela_dyn.add_reloc(DynamicReloc::new(target.tls_offset_rel(),
                    RelocLoc::GTlsOffset { sym: id }, Some(id)));
            }
            return true;
        }
        if !preemptible
        {
            return true;
        }
    }

    !target.is_tls_dyn(rel_type)
}

/* slot claim helpers: each records the claim on the symbol so repeat
   references are no-ops */

fn add_plt_entry(image: &mut OutputImage, symtab: &mut SymbolTable, id: SymbolId)
{
    let index = image.plt.add_entry(id);
    symtab.get_mut(id).plt_index = Some(index);
}

fn add_got_entry(image: &mut OutputImage, symtab: &mut SymbolTable, id: SymbolId) -> u32
{
    let index = image.got.add_entry(id);
    symtab.get_mut(id).got_index = Some(index);
    index
}

fn add_gotplt_entry(image: &mut OutputImage, symtab: &mut SymbolTable, id: SymbolId) -> u32
{
    let gotplt = match image.gotplt.as_mut()
    {
        Some(gotplt) => gotplt,
        None => fatal_msg!("GOT.PLT slot requested without lazy binding")
    };
    let index = gotplt.add_entry(id);
    symtab.get_mut(id).gotplt_index = Some(index);
    index
}

/* a relocation record naming a symbol forces it into .dynsym */

fn push_dyn_reloc(image: &mut OutputImage, symtab: &mut SymbolTable, reloc: DynamicReloc)
{
    if let (Some(id), false) = (reloc.sym, reloc.use_sym_va)
    {
        symtab.get_mut(id).must_be_in_dynsym = true;
    }
    image.rela_dyn.add_reloc(reloc);
}

fn push_plt_reloc(image: &mut OutputImage, symtab: &mut SymbolTable, reloc: DynamicReloc)
{
    if let (Some(id), false) = (reloc.sym, reloc.use_sym_va)
    {
        symtab.get_mut(id).must_be_in_dynsym = true;
    }
    match image.rela_plt.as_mut()
    {
        Some(rela_plt) => rela_plt.add_reloc(reloc),
        None => fatal_msg!("PLT relocation recorded without lazy binding")
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use super::super::config::default_config;
    use super::super::input::{ InputSection, LinkInputs, ObjectFile, RelocEntry };
    use super::super::symbols::{ Symbol, SymbolKind };
    use super::super::script::NullScript;
    use super::super::target::X86_64;
    use goblin::elf::header::EM_X86_64;
    use goblin::elf::reloc::*;
    use goblin::elf::section_header::SHT_PROGBITS;
    use goblin::elf::sym::{ STT_FUNC, STT_OBJECT, STT_TLS };

    /* one object with a .text section carrying the given relocations
       against the given symbols */
    fn fixture(relocs: Vec<RelocEntry>, symbols: Vec<Symbol>) -> (LinkInputs, SymbolTable)
    {
        let mut inputs = LinkInputs::new();
        let mut symtab = SymbolTable::new();

        let mut object = ObjectFile::new("demo.o");
        object.e_machine = EM_X86_64;

        for symbol in symbols
        {
            let id = symtab.add(symbol);
            object.symbols.push(SymSlot::Global(id));
        }

        let mut text = InputSection::new(".text", SHT_PROGBITS,
            super::super::elf::SHF_ALLOC | super::super::elf::SHF_EXECINSTR, 16, vec![ 0x90; 64 ]);
        text.relocs.push(RelocBatch { is_rela: true, entries: relocs });
        object.sections.push(text);

        inputs.shared.push(super::super::input::SharedFile::new("libc.so", "libc.so.6"));
        inputs.objects.push(object);
        (inputs, symtab)
    }

    fn scan(inputs: &LinkInputs, symtab: &mut SymbolTable, config: &Config) -> OutputImage
    {
        let target = X86_64;
        let mut image = OutputImage::new(config, &target, inputs);
        scan_relocations(&mut image, inputs, symtab, &target, &NullScript, config);
        image
    }

    fn shared_object_symbol(name: &str) -> Symbol
    {
        let mut sym = Symbol::new(name, SymbolKind::Shared { file: 0, value: 0x100, align: 8 });
        sym.sym_type = STT_OBJECT;
        sym.size = 8;
        sym
    }

    #[test]
    fn test_copy_relocation_is_idempotent()
    {
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_64, addend: 0 };
        let again = RelocEntry { offset: 8, sym_index: 1, rel_type: R_X86_64_64, addend: 0 };
        let (inputs, mut symtab) = fixture(vec![ reloc, again ], vec![ shared_object_symbol("stderr") ]);
        let config = default_config();
        let image = scan(&inputs, &mut symtab, &config);

        /* exactly one copy relocation despite two references */
        let copies = image.rela_dyn.relocs.iter()
            .filter(|r| r.rel_type == R_X86_64_COPY).count();
        assert_eq!(copies, 1);

        let id = symtab.find("stderr").unwrap();
        assert!(symtab.get(id).needs_copy());
        assert!(symtab.get(id).must_be_in_dynsym);
    }

    #[test]
    fn test_ifunc_takes_plt_and_gotplt()
    {
        let mut resolver = Symbol::new("fast_memcpy", SymbolKind::Defined { file: 0, section: 0, value: 0 });
        resolver.sym_type = STT_GNU_IFUNC;
        let reloc = RelocEntry { offset: 4, sym_index: 1, rel_type: R_X86_64_PC32, addend: -4 };
        let again = RelocEntry { offset: 12, sym_index: 1, rel_type: R_X86_64_PC32, addend: -4 };
        let (mut inputs, mut symtab) = fixture(vec![ reloc, again ], vec![ resolver ]);
        inputs.shared.clear();   /* a fully static link */
        let config = default_config();
        let image = scan(&inputs, &mut symtab, &config);

        assert_eq!(image.plt.entries().len(), 1);
        assert_eq!(image.gotplt.as_ref().unwrap().entries().len(), 1);
        let irelative = image.rela_plt.as_ref().unwrap().relocs.iter()
            .filter(|r| r.rel_type == R_X86_64_IRELATIVE).count();
        assert_eq!(irelative, 1);
        assert!(!image.rela_dyn.has_relocs());
    }

    #[test]
    fn test_plt_for_shared_function_call()
    {
        let mut puts = Symbol::new("puts", SymbolKind::Shared { file: 0, value: 0x40, align: 16 });
        puts.sym_type = STT_FUNC;
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_PLT32, addend: -4 };
        let (inputs, mut symtab) = fixture(vec![ reloc ], vec![ puts ]);
        let config = default_config();
        let image = scan(&inputs, &mut symtab, &config);

        let id = symtab.find("puts").unwrap();
        assert!(symtab.get(id).is_in_plt());
        assert_eq!(image.rela_plt.as_ref().unwrap().relocs.len(), 1);
        assert_eq!(image.rela_plt.as_ref().unwrap().relocs[0].rel_type, R_X86_64_JUMP_SLOT);
        assert!(inputs.shared[0].is_used.get());
    }

    #[test]
    fn test_tls_general_dynamic_pair()
    {
        let mut tls = Symbol::new("x", SymbolKind::Shared { file: 0, value: 0x10, align: 8 });
        tls.sym_type = STT_TLS;
        tls.is_tls = true;
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_TLSGD, addend: -4 };
        let again = RelocEntry { offset: 16, sym_index: 1, rel_type: R_X86_64_TLSGD, addend: -4 };
        let (inputs, mut symtab) = fixture(vec![ reloc, again ], vec![ tls ]);

        /* a shared output cannot relax TLS at all */
        let mut config = default_config();
        config.shared = true;
        let image = scan(&inputs, &mut symtab, &config);

        /* one module/offset pair in the GOT, two relocations, once */
        assert_eq!(image.got.slots().len(), 2);
        let module = image.rela_dyn.relocs.iter()
            .filter(|r| r.rel_type == R_X86_64_DTPMOD64).count();
        let offset = image.rela_dyn.relocs.iter()
            .filter(|r| r.rel_type == R_X86_64_DTPOFF64).count();
        assert_eq!((module, offset), (1, 1));
    }

    #[test]
    fn test_tls_relaxed_away_in_static_output()
    {
        let mut tls = Symbol::new("counter", SymbolKind::Defined { file: 0, section: 0, value: 0 });
        tls.sym_type = STT_TLS;
        tls.is_tls = true;
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_TLSGD, addend: -4 };
        let (mut inputs, mut symtab) = fixture(vec![ reloc ], vec![ tls ]);
        inputs.shared.clear();
        let config = default_config();
        let image = scan(&inputs, &mut symtab, &config);

        assert!(image.got.is_empty());
        assert!(!image.rela_dyn.has_relocs());
    }

    #[test]
    fn test_rescan_is_a_no_op_per_symbol()
    {
        let mut puts = Symbol::new("puts", SymbolKind::Shared { file: 0, value: 0x40, align: 16 });
        puts.sym_type = STT_FUNC;
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_PLT32, addend: -4 };
        let (inputs, mut symtab) = fixture(vec![ reloc ], vec![ puts ]);
        let config = default_config();
        let target = X86_64;
        let mut image = OutputImage::new(&config, &target, &inputs);

        scan_relocations(&mut image, &inputs, &mut symtab, &target, &NullScript, &config);
        let plt_after_one = image.plt.entries().len();
        let relocs_after_one = image.rela_plt.as_ref().unwrap().relocs.len();

        scan_relocations(&mut image, &inputs, &mut symtab, &target, &NullScript, &config);
        assert_eq!(image.plt.entries().len(), plt_after_one);
        assert_eq!(image.rela_plt.as_ref().unwrap().relocs.len(), relocs_after_one);
    }

    #[test]
    fn test_pic_relative_for_local_reference()
    {
        /* a PIC data word pointing at a local section symbol */
        let mut inputs = LinkInputs::new();
        let mut symtab = SymbolTable::new();
        let mut object = ObjectFile::new("demo.o");
        object.e_machine = EM_X86_64;

        object.locals.push(super::super::input::LocalSymbol
        {
            name: String::new(),
            value: 0,
            size: 0,
            sym_type: STT_SECTION,
            section: Some(1)
        });
        object.symbols.push(SymSlot::Local(0));

        let mut data = InputSection::new(".data", SHT_PROGBITS,
            super::super::elf::SHF_ALLOC | super::super::elf::SHF_WRITE, 8, vec![ 0; 8 ]);
        data.relocs.push(RelocBatch
        {
            is_rela: true,
            entries: vec![ RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_64, addend: 0x20 } ]
        });
        let rodata = InputSection::new(".rodata", SHT_PROGBITS, super::super::elf::SHF_ALLOC, 8, vec![ 0; 64 ]);
        object.sections.push(data);
        object.sections.push(rodata);
        inputs.objects.push(object);

        let mut config = default_config();
        config.shared = true;
        let image = scan(&inputs, &mut symtab, &config);

        assert_eq!(image.rela_dyn.relocs.len(), 1);
        let reloc = &image.rela_dyn.relocs[0];
        assert_eq!(reloc.rel_type, R_X86_64_RELATIVE);
        assert!(reloc.sym.is_none());
        /* section symbol: addend folded into the target offset */
        assert_eq!(reloc.section_target, Some(((0, 1), 0x20)));
        assert_eq!(reloc.addend, 0);
    }

    /* a neutral o32 MIPS oracle: only the constants, no x86 numbers
       shadowing the MIPS relocation space */
    struct Mips32;
    impl TargetOracle for Mips32
    {
        fn page_size(&self) -> u64 { 0x1000 }
        fn va_start(&self, shared: bool) -> u64 { if shared { 0 } else { 0x40_0000 } }
        fn use_lazy_binding(&self) -> bool { false }
        fn plt_header_size(&self) -> u64 { 32 }
        fn plt_entry_size(&self) -> u64 { 16 }
        fn copy_rel(&self) -> u32 { 126 }
        fn got_rel(&self) -> u32 { 51 }
        fn plt_rel(&self) -> u32 { 127 }
        fn relative_rel(&self) -> u32 { 3 }
        fn irelative_rel(&self) -> u32 { 248 }
        fn tls_got_rel(&self) -> u32 { 47 }
        fn tls_module_index_rel(&self) -> u32 { 38 }
        fn tls_offset_rel(&self) -> u32 { 39 }
    }

    /* MIPS gets GOT entries even for local symbols, and its paired and
       gp-relative relocations never reach the dynamic loader */
    #[test]
    fn test_mips_local_got_entries_and_gp_disp()
    {
        let mut inputs = LinkInputs::new();
        let mut symtab = SymbolTable::new();
        let mut object = ObjectFile::new("demo.o");
        object.e_machine = goblin::elf::header::EM_MIPS;

        let mut helper = Symbol::new("helper", SymbolKind::Defined { file: 0, section: 0, value: 4 });
        helper.is_used_in_regular_obj = true;
        let helper = symtab.add(helper);
        object.symbols.push(SymSlot::Global(helper));

        let gp_disp = symtab.add(Symbol::new("_gp_disp",
            SymbolKind::Undefined { weak: false, can_keep: true }));
        object.symbols.push(SymSlot::Global(gp_disp));

        let mut text = InputSection::new(".text", SHT_PROGBITS,
            super::super::elf::SHF_ALLOC | super::super::elf::SHF_EXECINSTR, 16, vec![ 0; 32 ]);
        text.relocs.push(RelocBatch
        {
            is_rela: false,
            entries: vec![
                /* two GOT16 references to the same local-bound symbol */
                RelocEntry { offset: 0, sym_index: 1, rel_type: super::super::elf::R_MIPS_GOT16, addend: 0 },
                RelocEntry { offset: 8, sym_index: 1, rel_type: super::super::elf::R_MIPS_GOT16, addend: 0 },
                /* the LO16 halves of paired relocations */
                RelocEntry { offset: 4, sym_index: 1, rel_type: super::super::elf::R_MIPS_LO16, addend: 0 },
                /* a HI16 measured against the gp pseudo-symbol */
                RelocEntry { offset: 12, sym_index: 2, rel_type: 5, addend: 0 }
            ]
        });
        object.sections.push(text);
        inputs.objects.push(object);

        let mut config = default_config();
        config.e_machine = goblin::elf::header::EM_MIPS;
        let target = Mips32;
        let mut image = OutputImage::new(&config, &target, &inputs);
        scan_relocations(&mut image, &inputs, &mut symtab, &target, &NullScript, &config);

        /* each GOT16 claims a local entry; nothing else leaves a trace */
        assert_eq!(image.got.num_mips_local_entries(), 2);
        assert!(image.got.slots().is_empty());
        assert!(!image.rela_dyn.has_relocs());
        assert!(image.rela_plt.is_none());
        assert!(!symtab.get(helper).is_in_got());
    }

    #[test]
    fn test_got_slot_for_preemptible_symbol()
    {
        let sym = shared_object_symbol("environ");
        let reloc = RelocEntry { offset: 0, sym_index: 1, rel_type: R_X86_64_GOTPCREL, addend: -4 };
        let (inputs, mut symtab) = fixture(vec![ reloc ], vec![ sym ]);
        let config = default_config();
        let image = scan(&inputs, &mut symtab, &config);

        let id = symtab.find("environ").unwrap();
        assert!(symtab.get(id).is_in_got());
        assert_eq!(image.rela_dyn.relocs.len(), 1);
        assert_eq!(image.rela_dyn.relocs[0].rel_type, R_X86_64_GLOB_DAT);
        assert!(matches!(image.rela_dyn.relocs[0].loc, RelocLoc::Got { index: 0 }));
    }
}
