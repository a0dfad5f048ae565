/* Assemble the output image
 *
 * The pipeline runs once, in order: copy kept locals, declare the
 * linker-defined symbols, assemble output sections and scan their
 * relocations, finish the symbol tables, order the sections, size
 * everything, build segments, assign addresses, and hand over to the
 * emitter. Each stage leaves its results on the OutputImage for the
 * stages after it.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use goblin::elf::dynamic::{ DT_DEBUG, DT_FINI, DT_FINI_ARRAY, DT_FINI_ARRAYSZ, DT_HASH,
                            DT_INIT, DT_INIT_ARRAY, DT_INIT_ARRAYSZ, DT_JMPREL, DT_NEEDED,
                            DT_NULL, DT_PLTGOT, DT_PLTREL, DT_PLTRELSZ, DT_REL, DT_RELA,
                            DT_RELAENT, DT_RELASZ, DT_RELENT, DT_RELSZ, DT_SONAME,
                            DT_STRSZ, DT_STRTAB, DT_SYMENT, DT_SYMTAB };
use goblin::elf::header::EM_MIPS;
use goblin::elf::section_header::{ SHT_FINI_ARRAY, SHT_INIT_ARRAY, SHT_NOBITS, SHT_NULL,
                                   SHT_PREINIT_ARRAY, SHT_PROGBITS, SHT_REL, SHT_RELA,
                                   SHT_GROUP, SHT_STRTAB, SHT_SYMTAB };
use goblin::elf::sym::{ STT_FILE, STT_SECTION };

use super::config::{ Config, Discard };
use super::context::{ LinkError, OutputImage };
use super::dynamic::DynValue;
use super::elf::{ self, align_to, DF_BIND_NOW, DT_FLAGS, DT_GNU_HASH, DT_MIPS_RLD_MAP,
                  DT_PREINIT_ARRAY, DT_PREINIT_ARRAYSZ };
use super::input::{ LinkInputs, LocalSymbol, ObjectFile };
use super::layout;
use super::output;
use super::scan;
use super::script::ScriptOracle;
use super::section::{ self, SecId, SectionFactory, Synth };
use super::symbols::{ Anchor, SymbolId, SymbolKind, SymbolTable };
use super::tables;
use super::target::TargetOracle;

/* the writer's entry point: lay out and emit one ELF image */
pub fn write_image(config: &Config, target: &dyn TargetOracle, script: &dyn ScriptOracle,
                   inputs: &LinkInputs, symtab: &mut SymbolTable) -> Result<(), LinkError>
{
    let mut image = OutputImage::new(config, target, inputs);

    if config.discard != Discard::All
    {
        copy_local_symbols(&mut image, inputs, config);
    }
    add_reserved_symbols(&mut image, symtab, config);

    if !create_sections(&mut image, inputs, symtab, target, script, config)
    {
        return Err(LinkError::UndefinedSymbols { messages: image.errors });
    }

    if !config.relocatable
    {
        layout::create_phdrs(&mut image, config);
        layout::assign_addresses(&mut image, target, config);
    }
    else
    {
        layout::assign_addresses_relocatable(&mut image);
    }

    fix_absolute_symbols(&mut image, symtab, config);
    output::write(&mut image, inputs, symtab, target, config)
}

/* S1: local symbols live with their object files, not in the resolved
   table; walk the files and keep the ones worth keeping */
fn copy_local_symbols(image: &mut OutputImage, inputs: &LinkInputs, config: &Config)
{
    let (symtab_sec, strtab) = match (&mut image.symtab, &mut image.strtab)
    {
        (Some(symtab_sec), Some(strtab)) => (symtab_sec, strtab),
        _ => return
    };

    for (file_idx, object) in inputs.objects.iter().enumerate()
    {
        for (local_idx, local) in object.locals.iter().enumerate()
        {
            if !should_keep_in_symtab(object, local, config)
            {
                continue;
            }
            if let Some(section) = local.section
            {
                if !object.sections[section].live
                {
                    continue;
                }
            }
            let name_off = strtab.add_string(&local.name);
            symtab_sec.add_local(file_idx, local_idx, name_off);
        }
    }
}

fn should_keep_in_symtab(object: &ObjectFile, local: &LocalSymbol, config: &Config) -> bool
{
    if local.sym_type == STT_SECTION || local.sym_type == STT_FILE
    {
        return false;
    }

    /* assembler-temporary labels normally never leave the assembler;
       when they do, drop them under --discard-locals, and drop the
       mergeable-section ones (the usual reason they survived) always */
    if !local.name.starts_with(".L") && !local.name.is_empty()
    {
        return true;
    }
    if config.discard == Discard::Locals
    {
        return false;
    }
    match local.section
    {
        Some(section) => object.sections[section].flags & elf::SHF_MERGE == 0,
        None => true
    }
}

/* S2: declare the symbols whose values only layout can provide */
fn add_reserved_symbols(image: &mut OutputImage, symtab: &mut SymbolTable, config: &Config)
{
    /* the dynamic linker defines __tls_get_addr for dynamic images; a
       static link is required to relax all TLS calls away, so satisfy
       references with a definition that is never emitted */
    if !image.is_dynamic
    {
        symtab.add_ignored("__tls_get_addr");
    }

    /* _end, _etext, _edata plus their no-underscore aliases. only the
       alias is gated on being referenced-but-undefined; programs are
       free to define "end" themselves */
    let mut define = |name: &str, alias: &str, slot: &mut Vec<SymbolId>|
    {
        if symtab.find(name).is_some()
        {
            slot.push(symtab.add_absolute(name));
        }
        if let Some(id) = symtab.find(alias)
        {
            if symtab.get(id).is_undefined()
            {
                slot.push(symtab.add_absolute(alias));
            }
        }
    };
    define("_end", "end", &mut image.reserved.end);
    define("_etext", "etext", &mut image.reserved.etext);
    define("_edata", "edata", &mut image.reserved.edata);

    if config.e_machine == EM_MIPS
    {
        image.reserved.mips_gp = Some(symtab.add_absolute("_gp"));
    }
}

/* S3 through S7: assemble, scan, finish symbols, order, finalize.
   returns false when collected errors should stop the link */
fn create_sections(image: &mut OutputImage, inputs: &LinkInputs, symtab: &mut SymbolTable,
                   target: &dyn TargetOracle, script: &dyn ScriptOracle, config: &Config) -> bool
{
    image.order.push(image.elf_header);
    if let Some(program_headers) = image.program_headers
    {
        image.order.push(program_headers);
    }

    /* loaders like to find .interp on the first page */
    if let Some(interp) = image.interp
    {
        image.order.push(interp);
    }

    /* bucket every kept input section into an output section */
    let mut factory = SectionFactory::new();
    let mut regular: Vec<SecId> = Vec::new();
    for (file_idx, object) in inputs.objects.iter().enumerate()
    {
        for (sec_idx, input) in object.sections.iter().enumerate()
        {
            if !input.live || script.is_discarded(&input.name)
            {
                report_discarded(config, object, input);
                continue;
            }

            /* symbol tables, relocations and group markers are consumed
               elsewhere; they never become output content */
            if matches!(input.sh_type, SHT_NULL | SHT_SYMTAB | SHT_STRTAB | SHT_REL | SHT_RELA | SHT_GROUP)
            {
                continue;
            }

            let out_name = section::output_section_name(script, &input.name);
            let (id, is_new) = factory.create(&mut image.sections, input, &out_name, config.e_machine);
            if is_new
            {
                image.order.push(id);
                regular.push(id);
            }
            let offset = image.sections[id].add_input((file_idx, sec_idx), input);
            image.section_map.insert((file_idx, sec_idx), (id, offset));
        }
    }

    /* bind the specially-treated aggregates, if inputs produced them */
    image.bss = factory.lookup(".bss", SHT_NOBITS, elf::SHF_ALLOC | elf::SHF_WRITE);
    image.opd = factory.lookup(".opd", SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE);
    image.preinit_array = factory.lookup(".preinit_array", SHT_PREINIT_ARRAY, elf::SHF_ALLOC | elf::SHF_WRITE);
    image.init_array = factory.lookup(".init_array", SHT_INIT_ARRAY, elf::SHF_ALLOC | elf::SHF_WRITE);
    image.fini_array = factory.lookup(".fini_array", SHT_FINI_ARRAY, elf::SHF_ALLOC | elf::SHF_WRITE);
    image.eh_frame = regular.iter().copied().find(|id| image.sections[*id].name == ".eh_frame");
    image.eh_frame_hdr_live = image.eh_frame.is_some() && !config.relocatable;

    /* initializers run in priority order; constructors by the
       crtbegin/crtend convention */
    if let Some(id) = image.init_array
    {
        sort_init_fini(image, inputs, id);
    }
    if let Some(id) = image.fini_array
    {
        sort_init_fini(image, inputs, id);
    }
    if let Some(id) = factory.lookup(".ctors", SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE)
    {
        sort_ctors_dtors(image, inputs, id);
    }
    if let Some(id) = factory.lookup(".dtors", SHT_PROGBITS, elf::SHF_ALLOC | elf::SHF_WRITE)
    {
        sort_ctors_dtors(image, inputs, id);
    }

    /* the runtime finds section extents through these */
    add_start_end_symbols(image, symtab);
    for id in &regular
    {
        add_start_stop_symbols(image, symtab, *id);
    }
    add_rel_iplt_symbols(image, symtab);

    /* S4: with every symbol declared, relocations can be classified */
    scan::scan_relocations(image, inputs, symtab, target, script, config);

    /* S5: the finishing pass over every symbol */
    let mut commons: Vec<SymbolId> = Vec::new();
    let mut copies: Vec<SymbolId> = Vec::new();
    for id in symtab.ids()
    {
        {
            let sym = symtab.get(id);
            if let SymbolKind::Undefined { weak, can_keep } = sym.kind
            {
                if !weak && !can_keep
                {
                    report_undefined(image, inputs, symtab, id, config);
                }
            }
            if matches!(sym.kind, SymbolKind::DefinedCommon { .. })
            {
                commons.push(id);
            }
            if sym.needs_copy()
            {
                copies.push(id);
            }
        }

        if !include_in_symtab(inputs, symtab, id)
        {
            continue;
        }
        if let (Some(symtab_sec), Some(strtab)) = (&mut image.symtab, &mut image.strtab)
        {
            let name_off = strtab.add_string(&symtab.get(id).name);
            symtab_sec.add_symbol(id, name_off);
        }
        if image.is_dynamic && include_in_dynsym(symtab, id, config)
        {
            let name_off = image.dynstr.add_string(&symtab.get(id).name);
            image.dynsym.add_symbol(id, name_off);
        }
    }

    /* do not lay out an image we already know is broken */
    if !image.errors.is_empty()
    {
        return false;
    }

    add_common_symbols(image, symtab, &mut commons);
    add_copy_rel_symbols(image, symtab, &copies);

    add_predefined_sections(image);

    /* S6: the stable total order, then table indices. section names are
       interned by the emitter's writer, which owns .shstrtab */
    {
        let OutputImage { ref mut order, ref sections, .. } = *image;
        order.sort_by(|a, b| section::compare_sections(&sections[*a], &sections[*b], config, script));
    }
    let dummy = image.dummy_sections_num();
    for position in dummy..image.order.len()
    {
        let id = image.order[position];
        image.sections[id].shndx = (position + 1 - dummy) as u32;
    }

    /* S7: sizes and headers. .dynsym goes first since it feeds the
       hash tables; .dynamic goes last since it appends to .dynstr */
    if image.is_dynamic
    {
        finalize_dynsym(image, symtab, config);
    }
    for position in 0..image.order.len()
    {
        let id = image.order[position];
        if id != image.dynstr_sec && id != image.dynamic_sec
        {
            finalize_section(image, config, id);
        }
    }
    if image.is_dynamic
    {
        finalize_dynamic(image, inputs, symtab, config);
    }
    image.sections[image.dynstr_sec].size = image.dynstr.size();
    image.sections[image.dynamic_sec].size = image.dynamic.size(config.class);

    true
}

fn report_discarded(config: &Config, object: &ObjectFile, input: &super::input::InputSection)
{
    if config.print_gc_sections && !input.live
    {
        eprintln!("removing unused section from '{}' in file '{}'", input.name, object.name);
    }
}

fn report_undefined(image: &mut OutputImage, inputs: &LinkInputs, symtab: &SymbolTable,
                    id: SymbolId, config: &Config)
{
    if (config.relocatable || config.shared || config.allow_undefined) && !config.no_undefined
    {
        return;
    }

    let mut message = format!("undefined symbol: {}", symtab.get(id).name);
    if let Some(filename) = symtab.find_file(inputs, id)
    {
        message = format!("{} in {}", message, filename);
    }
    if config.no_inhibit_exec
    {
        image.warning(message);
    }
    else
    {
        image.error(message);
    }
}

/* keep a resolved symbol in .symtab? */
fn include_in_symtab(inputs: &LinkInputs, symtab: &SymbolTable, id: SymbolId) -> bool
{
    let sym = symtab.get(id);
    if !sym.is_used_in_regular_obj
    {
        return false;
    }
    match sym.kind
    {
        SymbolKind::Ignored => false,
        /* symbols whose home was garbage-collected go with it */
        SymbolKind::Defined { file, section, .. } => inputs.objects[file].sections[section].live,
        _ => true
    }
}

/* export a symbol through .dynsym? */
fn include_in_dynsym(symtab: &SymbolTable, id: SymbolId, config: &Config) -> bool
{
    let sym = symtab.get(id);
    if sym.visibility != elf::STV_DEFAULT && sym.visibility != elf::STV_PROTECTED
    {
        return false;
    }
    if matches!(sym.kind, SymbolKind::Ignored)
    {
        return false;
    }
    if config.export_dynamic || config.shared
    {
        return true;
    }
    sym.must_be_in_dynsym
}

/* S5: commons go at the end of .bss, biggest alignment first so the
   packing wastes little */
fn add_common_symbols(image: &mut OutputImage, symtab: &mut SymbolTable, commons: &mut Vec<SymbolId>)
{
    if commons.is_empty()
    {
        return;
    }

    commons.sort_by(|a, b|
    {
        let align_of = |id: &SymbolId| match symtab.get(*id).kind
        {
            SymbolKind::DefinedCommon { align, .. } => align,
            _ => 1
        };
        align_of(b).cmp(&align_of(a))
    });

    let bss = image.get_bss();
    let mut offset = image.sec(bss).size;
    let mut max_align = image.sec(bss).align;
    for id in commons.iter()
    {
        if let SymbolKind::DefinedCommon { size, align } = symtab.get(*id).kind
        {
            offset = align_to(offset, align.max(1));
            symtab.get_mut(*id).offset_in_bss = Some(offset);
            offset = offset + size;
            max_align = max_align.max(align);
        }
    }
    let bss_sec = image.sec_mut(bss);
    bss_sec.size = offset;
    bss_sec.update_align(max_align);
}

/* S5: reserve .bss room for copy-relocated shared symbols. the copied
   storage must keep the alignment its home had in the library, which
   is bounded by both the section alignment and the value's low bits */
fn add_copy_rel_symbols(image: &mut OutputImage, symtab: &mut SymbolTable, copies: &Vec<SymbolId>)
{
    if copies.is_empty()
    {
        return;
    }

    let bss = image.get_bss();
    let mut offset = image.sec(bss).size;
    for id in copies.iter()
    {
        if let SymbolKind::Shared { value, align, .. } = symtab.get(*id).kind
        {
            let trailing = align.max(1).trailing_zeros().min(
                if value == 0 { 63 } else { value.trailing_zeros() });
            let slot_align = 1u64 << trailing;
            image.sec_mut(bss).update_align(slot_align);
            offset = align_to(offset, slot_align);
            symtab.get_mut(*id).offset_in_bss = Some(offset);
            offset = offset + symtab.get(*id).size;
        }
    }
    image.sec_mut(bss).size = offset;
}

/* reorder an aggregate's contributions and re-place them, keeping the
   assignment map in step */
fn resort_contributions<K: Fn(&super::input::InputSection, &str) -> (i64, String)>(
    image: &mut OutputImage, inputs: &LinkInputs, id: SecId, key: K)
{
    let section = &mut image.sections[id];
    let contribs = match &mut section.content
    {
        super::section::Content::Aggregate { inputs: contribs, .. } => contribs,
        _ => return
    };

    contribs.sort_by_key(|c|
    {
        let input = inputs.section(c.sec);
        key(input, &inputs.objects[c.sec.0].name)
    });

    let mut size = 0;
    for contribution in contribs.iter_mut()
    {
        let input = inputs.section(contribution.sec);
        let offset = align_to(size, input.align.max(1));
        contribution.offset = offset;
        size = offset + input.size;
    }
    section.size = size;

    /* refresh the assignment map with the new offsets */
    let mapped: Vec<(super::input::SectionRef, u64)> = match &section.content
    {
        super::section::Content::Aggregate { inputs: contribs, .. } =>
            contribs.iter().map(|c| (c.sec, c.offset)).collect(),
        _ => Vec::new()
    };
    for (sec_ref, offset) in mapped
    {
        image.section_map.insert(sec_ref, (id, offset));
    }
}

/* __attribute__((init_priority(N))) encodes N as a numeric suffix */
fn init_fini_priority(name: &str) -> i64
{
    match name.rsplit('.').next().and_then(|suffix| suffix.parse::<i64>().ok())
    {
        Some(priority) => priority,
        None => 65536   /* unsuffixed sections run last */
    }
}

fn sort_init_fini(image: &mut OutputImage, inputs: &LinkInputs, id: SecId)
{
    resort_contributions(image, inputs, id,
        |input, _| (init_fini_priority(&input.name), String::new()));
}

/* .ctors/.dtors keep the GNU shape: crtbegin's sentinel first, then
   prioritized entries (already name-encoded to sort ascending), then
   crtend's terminator */
fn sort_ctors_dtors(image: &mut OutputImage, inputs: &LinkInputs, id: SecId)
{
    resort_contributions(image, inputs, id, |input, filename|
    {
        let group = if filename.contains("crtbegin") { 0 }
            else if filename.contains("crtend") { 2 }
            else { 1 };
        (group, String::from(&input.name))
    });
}

/* bracket symbols for the initializer arrays; images without one get a
   satisfied-but-absent definition */
fn add_start_end_symbols(image: &mut OutputImage, symtab: &mut SymbolTable)
{
    let mut define = |start: &str, end: &str, section: Option<SecId>|
    {
        match section
        {
            Some(id) =>
            {
                symtab.add_synthetic(start, id, Anchor::Start);
                symtab.add_synthetic(end, id, Anchor::End);
            },
            None =>
            {
                symtab.add_ignored(start);
                symtab.add_ignored(end);
            }
        }
    };

    define("__preinit_array_start", "__preinit_array_end", image.preinit_array);
    define("__init_array_start", "__init_array_end", image.init_array);
    define("__fini_array_start", "__fini_array_end", image.fini_array);
}

/* __start_<section>/__stop_<section> for C-identifier-named sections,
   only where something references them */
fn add_start_stop_symbols(image: &mut OutputImage, symtab: &mut SymbolTable, id: SecId)
{
    let name = image.sec(id).name.clone();
    if !section::is_valid_c_identifier(&name)
    {
        return;
    }

    let start = format!("__start_{}", name);
    let stop = format!("__stop_{}", name);
    if let Some(sym) = symtab.find(&start)
    {
        if symtab.get(sym).is_undefined()
        {
            symtab.add_synthetic(&start, id, Anchor::Start);
        }
    }
    if let Some(sym) = symtab.find(&stop)
    {
        if symtab.get(sym).is_undefined()
        {
            symtab.add_synthetic(&stop, id, Anchor::End);
        }
    }
}

/* a static image resolves its IRELATIVE relocations itself at startup;
   bracket .rela.plt so the startup code can find them */
fn add_rel_iplt_symbols(image: &mut OutputImage, symtab: &mut SymbolTable)
{
    if image.is_dynamic || image.rela_plt_sec.is_none()
    {
        return;
    }

    let (start, end) = if image.class.uses_rela()
    {
        ("__rela_iplt_start", "__rela_iplt_end")
    }
    else
    {
        ("__rel_iplt_start", "__rel_iplt_end")
    };
    if symtab.find(start).is_some()
    {
        image.reserved.rela_iplt_start = Some(symtab.add_absolute(start));
    }
    if symtab.find(end).is_some()
    {
        image.reserved.rela_iplt_end = Some(symtab.add_absolute(end));
    }
}

/* push the writer's own sections into the image, content permitting */
fn add_predefined_sections(image: &mut OutputImage)
{
    let mut order: Vec<SecId> = Vec::new();
    let mut add = |slot: &mut Vec<SecId>, id: Option<SecId>|
    {
        if let Some(id) = id
        {
            slot.push(id);
        }
    };

    add(&mut order, image.symtab_sec);
    add(&mut order, image.strtab_sec);

    if image.is_dynamic
    {
        add(&mut order, Some(image.dynsym_sec));
        add(&mut order, image.gnu_hash_sec);
        add(&mut order, image.hash_sec);
        add(&mut order, Some(image.dynamic_sec));
        add(&mut order, Some(image.dynstr_sec));
        if image.rela_dyn.has_relocs()
        {
            add(&mut order, Some(image.rela_dyn_sec));
        }
        add(&mut order, image.rld_map_sec);
    }

    /* .rela.plt also appears in static images, carrying IRELATIVE
       relocations the startup code applies */
    if let (Some(rela_plt), Some(rela_plt_sec)) = (&mut image.rela_plt, image.rela_plt_sec)
    {
        if rela_plt.has_relocs()
        {
            rela_plt.statik = !image.is_dynamic;
            order.push(rela_plt_sec);
        }
    }

    if needs_got(image)
    {
        add(&mut order, Some(image.got_sec));
    }
    if let Some(gotplt) = &image.gotplt
    {
        if !gotplt.is_empty()
        {
            add(&mut order, image.gotplt_sec);
        }
    }
    if !image.plt.is_empty()
    {
        add(&mut order, Some(image.plt_sec));
    }
    if image.eh_frame_hdr_live
    {
        add(&mut order, Some(image.eh_frame_hdr_sec));
    }

    image.order.extend(order);
}

fn needs_got(image: &OutputImage) -> bool
{
    if !image.got.is_empty()
    {
        return true;
    }
    /* a dynamic MIPS image advertises .got through .dynamic whether or
       not anything claimed a slot */
    if image.is_dynamic && image.rld_map_sec.is_some()
    {
        return true;
    }
    image.has_got_off_rel
}

/* S7 for one section: fix its size and header cross-references */
fn finalize_section(image: &mut OutputImage, config: &Config, id: SecId)
{
    let class = config.class;
    let dynsym_shndx = image.sections[image.dynsym_sec].shndx;
    let symtab_shndx = image.symtab_sec.map(|id| image.sections[id].shndx).unwrap_or(0);
    let strtab_shndx = image.strtab_sec.map(|id| image.sections[id].shndx).unwrap_or(0);
    let dynstr_shndx = image.sections[image.dynstr_sec].shndx;
    let gotplt_shndx = image.gotplt_sec.map(|id| image.sections[id].shndx).unwrap_or(0);
    let got_shndx = image.sections[image.got_sec].shndx;

    let which = match image.sections[id].synth_kind()
    {
        Some(which) => which,
        None => return   /* aggregates were sized during assembly */
    };

    match which
    {
        Synth::Interp =>
        {
            let path = config.dynamic_linker.clone().unwrap_or_default();
            image.sections[id].size = path.len() as u64 + 1;
        },

        Synth::Got =>
        {
            image.sections[id].size = image.got.size(class);
        },

        Synth::GotPlt =>
        {
            if let Some(gotplt) = &image.gotplt
            {
                image.sections[id].size = gotplt.size(class);
            }
        },

        Synth::Plt =>
        {
            image.sections[id].size = image.plt.size(image.plt_header_size, image.plt_entry_size);
        },

        Synth::RelaDyn =>
        {
            let section = &mut image.sections[id];
            section.size = image.rela_dyn.size(class);
            section.link = dynsym_shndx;
        },

        Synth::RelaPlt =>
        {
            if let Some(rela_plt) = &image.rela_plt
            {
                let link = if rela_plt.statik { symtab_shndx } else { dynsym_shndx };
                let info = if gotplt_shndx != 0 { gotplt_shndx } else { got_shndx };
                let section = &mut image.sections[id];
                section.size = rela_plt.size(class);
                section.link = link;
                section.info = info;
            }
        },

        Synth::Dynamic =>
        {
            /* sized after its own finalization; just link .dynstr */
            image.sections[id].link = dynstr_shndx;
        },

        Synth::DynSymTab =>
        {
            let section = &mut image.sections[id];
            section.size = image.dynsym.size(class);
            section.link = dynstr_shndx;
            section.info = image.dynsym.first_global_index();
        },

        Synth::SymTab =>
        {
            if let Some(symtab_content) = &image.symtab
            {
                let section = &mut image.sections[id];
                section.size = symtab_content.size(class);
                section.link = strtab_shndx;
                section.info = symtab_content.first_global_index();
            }
        },

        Synth::StrTab =>
        {
            if let Some(strtab) = &image.strtab
            {
                image.sections[id].size = strtab.size();
            }
        },

        Synth::DynStrTab => (),   /* sized after .dynamic adds its strings */

        Synth::HashTab =>
        {
            let section = &mut image.sections[id];
            section.size = image.hash_data.len() as u64;
            section.link = dynsym_shndx;
        },

        Synth::GnuHashTab =>
        {
            let section = &mut image.sections[id];
            section.size = image.gnu_hash_data.len() as u64;
            section.link = dynsym_shndx;
        },

        Synth::EhFrameHdr =>
        {
            /* version, three encoding bytes, one pc-relative pointer
               to .eh_frame; the binary-search table is the unwind
               machinery's to fill */
            image.sections[id].size = 8;
        },

        /* fixed at creation or during layout */
        Synth::MipsRldMap | Synth::ElfHeader | Synth::ProgramHeaders => ()
    }
}

/* S7 for .dynsym: order the table for hashing, hand out indices, and
   build the hash sections */
fn finalize_dynsym(image: &mut OutputImage, symtab: &mut SymbolTable, config: &Config)
{
    /* a symbol defined by this image can be hashed; imports sit
       unhashed at the front of the table */
    let defined_here = |symtab: &SymbolTable, id: SymbolId| -> bool
    {
        let sym = symtab.get(id);
        match sym.kind
        {
            SymbolKind::Defined { .. } | SymbolKind::DefinedCommon { .. }
                | SymbolKind::DefinedAbsolute { .. } | SymbolKind::Synthetic { .. } => true,
            SymbolKind::Shared { .. } => sym.needs_copy(),
            SymbolKind::Undefined { .. } | SymbolKind::Ignored => false
        }
    };

    let mut unhashed: Vec<(SymbolId, u32)> = Vec::new();
    let mut hashed: Vec<(SymbolId, u32)> = Vec::new();
    for entry in image.dynsym.globals.iter()
    {
        if defined_here(symtab, entry.0)
        {
            hashed.push(*entry);
        }
        else
        {
            unhashed.push(*entry);
        }
    }

    if config.gnu_hash
    {
        /* GNU hash lookup needs each bucket's symbols adjacent */
        let nbuckets = (hashed.len().max(1) as u32).next_power_of_two();
        hashed.sort_by_key(|(id, _)| tables::gnu_hash(&symtab.get(*id).name) % nbuckets);
    }

    image.dynsym.globals = unhashed;
    let symoffset = 1 + image.dynsym.globals.len() as u32;
    image.dynsym.globals.extend(hashed.iter().copied());

    for (position, (id, _)) in image.dynsym.globals.iter().enumerate()
    {
        symtab.get_mut(*id).dynsym_index = Some(1 + position as u32);
    }

    if config.gnu_hash
    {
        let hashes: Vec<u32> = hashed.iter()
            .map(|(id, _)| tables::gnu_hash(&symtab.get(*id).name)).collect();
        image.gnu_hash_data = tables::build_gnu_hash(config.class, image.endian, symoffset, &hashes);
    }
    if config.sysv_hash
    {
        let dynsym_count = 1 + image.dynsym.globals.len() as u32;
        let all: Vec<(u32, u32)> = image.dynsym.globals.iter().enumerate()
            .map(|(position, (id, _))| (1 + position as u32, tables::sysv_hash(&symtab.get(*id).name)))
            .collect();
        image.hash_data = tables::build_sysv_hash(image.endian, dynsym_count, &all);
    }
}

/* S7 for .dynamic: decide the tags, which also settles .dynstr */
fn finalize_dynamic(image: &mut OutputImage, inputs: &LinkInputs, symtab: &SymbolTable, config: &Config)
{
    let class = config.class;
    let uses_rela = class.uses_rela();

    for library in &inputs.shared
    {
        if library.is_used.get()
        {
            let name_off = image.dynstr.add_string(&library.soname);
            image.dynamic.add(DT_NEEDED, DynValue::Plain(name_off as u64));
        }
    }

    if config.shared
    {
        if let Some(soname) = &config.soname
        {
            let name_off = image.dynstr.add_string(soname);
            image.dynamic.add(DT_SONAME, DynValue::Plain(name_off as u64));
        }
    }

    if image.rela_dyn.has_relocs()
    {
        let (tag, size_tag, ent_tag) = if uses_rela { (DT_RELA, DT_RELASZ, DT_RELAENT) }
            else { (DT_REL, DT_RELSZ, DT_RELENT) };
        image.dynamic.add(tag, DynValue::SectionVa(image.rela_dyn_sec));
        image.dynamic.add(size_tag, DynValue::SectionSize(image.rela_dyn_sec));
        image.dynamic.add(ent_tag, DynValue::Plain(class.reloc_size()));
    }

    if let (Some(rela_plt), Some(rela_plt_sec)) = (&image.rela_plt, image.rela_plt_sec)
    {
        if rela_plt.has_relocs()
        {
            image.dynamic.add(DT_JMPREL, DynValue::SectionVa(rela_plt_sec));
            image.dynamic.add(DT_PLTRELSZ, DynValue::SectionSize(rela_plt_sec));
            let slots = image.gotplt_sec.unwrap_or(image.got_sec);
            image.dynamic.add(DT_PLTGOT, DynValue::SectionVa(slots));
            image.dynamic.add(DT_PLTREL, DynValue::Plain(if uses_rela { DT_RELA } else { DT_REL }));
        }
    }

    image.dynamic.add(DT_SYMTAB, DynValue::SectionVa(image.dynsym_sec));
    image.dynamic.add(DT_SYMENT, DynValue::Plain(class.sym_size()));
    image.dynamic.add(DT_STRTAB, DynValue::SectionVa(image.dynstr_sec));

    if let Some(gnu_hash_sec) = image.gnu_hash_sec
    {
        image.dynamic.add(DT_GNU_HASH, DynValue::SectionVa(gnu_hash_sec));
    }
    if let Some(hash_sec) = image.hash_sec
    {
        image.dynamic.add(DT_HASH, DynValue::SectionVa(hash_sec));
    }

    if let Some(preinit) = image.preinit_array
    {
        image.dynamic.add(DT_PREINIT_ARRAY, DynValue::SectionVa(preinit));
        image.dynamic.add(DT_PREINIT_ARRAYSZ, DynValue::SectionSize(preinit));
    }
    if let Some(init) = image.init_array
    {
        image.dynamic.add(DT_INIT_ARRAY, DynValue::SectionVa(init));
        image.dynamic.add(DT_INIT_ARRAYSZ, DynValue::SectionSize(init));
    }
    if let Some(fini) = image.fini_array
    {
        image.dynamic.add(DT_FINI_ARRAY, DynValue::SectionVa(fini));
        image.dynamic.add(DT_FINI_ARRAYSZ, DynValue::SectionSize(fini));
    }

    if let Some(init) = symtab.find(&config.init_symbol)
    {
        if !symtab.get(init).is_undefined()
        {
            image.dynamic.add(DT_INIT, DynValue::SymbolVa(init));
        }
    }
    if let Some(fini) = symtab.find(&config.fini_symbol)
    {
        if !symtab.get(fini).is_undefined()
        {
            image.dynamic.add(DT_FINI, DynValue::SymbolVa(fini));
        }
    }

    if let Some(rld_map) = image.rld_map_sec
    {
        image.dynamic.add(DT_MIPS_RLD_MAP, DynValue::SectionVa(rld_map));
    }

    if config.z_now
    {
        image.dynamic.add(DT_FLAGS, DynValue::Plain(DF_BIND_NOW));
    }
    if !config.shared
    {
        image.dynamic.add(DT_DEBUG, DynValue::Plain(0));
    }

    /* DT_STRSZ waits until every string is in */
    image.dynamic.add(DT_STRSZ, DynValue::Plain(image.dynstr.size()));
    image.dynamic.add(DT_NULL, DynValue::Plain(0));
}

/* S9 epilogue: patch the symbols whose values waited for layout */
fn fix_absolute_symbols(image: &mut OutputImage, symtab: &mut SymbolTable, config: &Config)
{
    let set = |symtab: &mut SymbolTable, id: Option<SymbolId>, value: u64|
    {
        if let Some(id) = id
        {
            symtab.get_mut(id).kind = SymbolKind::DefinedAbsolute { value };
        }
    };

    /* __rela_iplt_start/_end bracket .rela.plt */
    if let Some(rela_plt_sec) = image.rela_plt_sec
    {
        let start = image.sec(rela_plt_sec).va;
        let size = image.sec(rela_plt_sec).size;
        set(symtab, image.reserved.rela_iplt_start, start);
        set(symtab, image.reserved.rela_iplt_end, start + size);
    }

    /* the MIPS global pointer sits at a fixed bias into the GOT */
    if config.e_machine == EM_MIPS
    {
        let gp = image.sec(image.got_sec).va.wrapping_add(0x7ff0);
        set(symtab, image.reserved.mips_gp, gp);
    }

    /* _end: one past the data segment. _etext: past the last read-only
       loadable byte. _edata: past the last file-backed byte */
    for id in image.reserved.end.clone()
    {
        set(symtab, Some(id), image.end_va);
    }
    let mut etext = 0;
    let mut edata = 0;
    for id in &image.order
    {
        let section = image.sec(*id);
        if !section.is_alloc()
        {
            continue;
        }
        if !section.is_writable()
        {
            etext = section.va + section.size;
        }
        if !section.is_nobits()
        {
            edata = section.va + section.size;
        }
    }
    for id in image.reserved.etext.clone()
    {
        set(symtab, Some(id), etext);
    }
    for id in image.reserved.edata.clone()
    {
        set(symtab, Some(id), edata);
    }
}

/* where execution starts: a symbol if configured, a raw address as the
   fallback */
pub fn entry_address(image: &OutputImage, symtab: &SymbolTable, config: &Config) -> u64
{
    if let Some(name) = &config.entry_symbol
    {
        if let Some(id) = symtab.find(name)
        {
            return image.symbol_va(symtab, id);
        }
        return 0;
    }
    config.entry_address.unwrap_or(0)
}

#[cfg(test)]
mod tests
{
    use super::*;
    use super::super::config::default_config;
    use super::super::input::{ InputSection, SharedFile };
    use super::super::symbols::Symbol;
    use super::super::script::NullScript;
    use super::super::target::X86_64;
    use goblin::elf::header::EM_X86_64;

    fn image_for(inputs: &LinkInputs, config: &Config) -> OutputImage
    {
        OutputImage::new(config, &X86_64, inputs)
    }

    #[test]
    fn test_local_symbol_keep_rules()
    {
        let mut object = ObjectFile::new("demo.o");
        object.sections.push(InputSection::new(".text", SHT_PROGBITS,
            elf::SHF_ALLOC | elf::SHF_EXECINSTR, 4, vec![ 0x90 ]));
        object.sections.push(InputSection::new(".rodata.str1.1", SHT_PROGBITS,
            elf::SHF_ALLOC | elf::SHF_MERGE | elf::SHF_STRINGS, 1, vec![ 0 ]));

        let keep = |name: &str, sym_type: u8, section: Option<usize>, config: &Config|
        {
            should_keep_in_symtab(&object, &LocalSymbol
            {
                name: String::from(name),
                value: 0,
                size: 0,
                sym_type,
                section
            }, config)
        };

        let config = default_config();
        assert!(keep("helper", goblin::elf::sym::STT_FUNC, Some(0), &config));
        assert!(!keep(".text", STT_SECTION, Some(0), &config));
        assert!(!keep("demo.c", STT_FILE, None, &config));

        /* .L locals survive by default except in mergeable sections */
        assert!(keep(".Ltmp1", goblin::elf::sym::STT_NOTYPE, Some(0), &config));
        assert!(!keep(".Lstr", goblin::elf::sym::STT_NOTYPE, Some(1), &config));

        let mut discard_locals = default_config();
        discard_locals.discard = Discard::Locals;
        assert!(!keep(".Ltmp1", goblin::elf::sym::STT_NOTYPE, Some(0), &discard_locals));
        assert!(keep("helper", goblin::elf::sym::STT_FUNC, Some(0), &discard_locals));
    }

    #[test]
    fn test_commons_pack_descending_by_alignment()
    {
        let inputs = LinkInputs::new();
        let config = default_config();
        let mut image = image_for(&inputs, &config);
        let mut symtab = SymbolTable::new();

        let mut make = |name: &str, size: u64, align: u64|
        {
            symtab.add(Symbol::new(name, SymbolKind::DefinedCommon { size, align }))
        };
        let small = make("small", 1, 1);
        let big = make("big", 16, 16);
        let medium = make("medium", 8, 8);

        let mut commons = vec![ small, big, medium ];
        add_common_symbols(&mut image, &mut symtab, &mut commons);

        /* descending alignment: big at 0, medium at 16, small at 24 */
        assert_eq!(symtab.get(big).offset_in_bss, Some(0));
        assert_eq!(symtab.get(medium).offset_in_bss, Some(16));
        assert_eq!(symtab.get(small).offset_in_bss, Some(24));
        let bss = image.bss.unwrap();
        assert_eq!(image.sec(bss).size, 25);

        /* packing again from the same inputs is identical */
        let mut again = vec![ small, big, medium ];
        again.sort_by(|a, b|
        {
            let align_of = |id: &SymbolId| match symtab.get(*id).kind
            {
                SymbolKind::DefinedCommon { align, .. } => align,
                _ => 1
            };
            align_of(b).cmp(&align_of(a))
        });
        assert_eq!(again, vec![ big, medium, small ]);
    }

    #[test]
    fn test_copy_slot_alignment_rule()
    {
        let inputs = LinkInputs::new();
        let config = default_config();
        let mut image = image_for(&inputs, &config);
        let mut symtab = SymbolTable::new();

        /* section alignment 16 but the value sits at an 8-aligned spot:
           the slot alignment is the smaller power of two */
        let mut sym = Symbol::new("stderr", SymbolKind::Shared { file: 0, value: 0x1008, align: 16 });
        sym.sym_type = goblin::elf::sym::STT_OBJECT;
        sym.size = 8;
        sym.needs_copy_or_plt_addr = true;
        let id = symtab.add(sym);

        add_copy_rel_symbols(&mut image, &mut symtab, &vec![ id ]);
        assert_eq!(symtab.get(id).offset_in_bss, Some(0));
        let bss = image.bss.unwrap();
        assert_eq!(image.sec(bss).align, 8);
        assert_eq!(image.sec(bss).size, 8);
    }

    #[test]
    fn test_undefined_symbol_policy()
    {
        let mut inputs = LinkInputs::new();
        inputs.objects.push(ObjectFile::new("demo.o"));
        let mut symtab = SymbolTable::new();
        let mut missing = Symbol::new("nowhere", SymbolKind::Undefined { weak: false, can_keep: false });
        missing.is_used_in_regular_obj = true;
        let id = symtab.add(missing);

        /* an executable link reports the error */
        let config = default_config();
        let mut image = image_for(&inputs, &config);
        report_undefined(&mut image, &inputs, &symtab, id, &config);
        assert_eq!(image.errors.len(), 1);
        assert!(image.errors[0].contains("undefined symbol: nowhere"));

        /* a shared link tolerates it */
        let mut shared = default_config();
        shared.shared = true;
        let mut image = image_for(&inputs, &shared);
        report_undefined(&mut image, &inputs, &symtab, id, &shared);
        assert!(image.errors.is_empty());

        /* --no-inhibit-exec downgrades to a warning */
        let mut lenient = default_config();
        lenient.no_inhibit_exec = true;
        let mut image = image_for(&inputs, &lenient);
        report_undefined(&mut image, &inputs, &symtab, id, &lenient);
        assert!(image.errors.is_empty());
        assert_eq!(image.warnings.len(), 1);
    }

    #[test]
    fn test_init_array_priority_order()
    {
        let mut inputs = LinkInputs::new();
        let mut object = ObjectFile::new("demo.o");
        object.e_machine = EM_X86_64;
        object.sections.push(InputSection::new(".init_array", SHT_INIT_ARRAY,
            elf::SHF_ALLOC | elf::SHF_WRITE, 8, vec![ 0xaa; 8 ]));
        object.sections.push(InputSection::new(".init_array.00010", SHT_INIT_ARRAY,
            elf::SHF_ALLOC | elf::SHF_WRITE, 8, vec![ 0xbb; 8 ]));
        object.sections.push(InputSection::new(".init_array.00005", SHT_INIT_ARRAY,
            elf::SHF_ALLOC | elf::SHF_WRITE, 8, vec![ 0xcc; 8 ]));
        inputs.objects.push(object);

        let config = default_config();
        let mut symtab = SymbolTable::new();
        let mut image = image_for(&inputs, &config);
        assert!(create_sections(&mut image, &inputs, &mut symtab, &X86_64, &NullScript, &config));

        let init = image.init_array.expect("init_array bound");
        /* priority 5, then 10, then the unsuffixed catch-all */
        assert_eq!(image.section_map.get(&(0, 2)), Some(&(init, 0)));
        assert_eq!(image.section_map.get(&(0, 1)), Some(&(init, 8)));
        assert_eq!(image.section_map.get(&(0, 0)), Some(&(init, 16)));
    }

    #[test]
    fn test_reserved_symbols_only_when_referenced()
    {
        let inputs = LinkInputs::new();
        let config = default_config();
        let mut image = image_for(&inputs, &config);
        let mut symtab = SymbolTable::new();

        /* nothing references _end: nothing is defined */
        add_reserved_symbols(&mut image, &mut symtab, &config);
        assert!(symtab.find("_end").is_none());
        /* a static image gets the __tls_get_addr sentinel */
        assert!(matches!(symtab.get(symtab.find("__tls_get_addr").unwrap()).kind, SymbolKind::Ignored));

        /* with a reference in place, _end becomes absolute */
        let mut symtab = SymbolTable::new();
        let mut wanted = Symbol::new("_end", SymbolKind::Undefined { weak: false, can_keep: false });
        wanted.is_used_in_regular_obj = true;
        symtab.add(wanted);
        let mut image = image_for(&inputs, &config);
        add_reserved_symbols(&mut image, &mut symtab, &config);
        let id = symtab.find("_end").unwrap();
        assert!(matches!(symtab.get(id).kind, SymbolKind::DefinedAbsolute { .. }));
        assert_eq!(image.reserved.end, vec![ id ]);
    }

    #[test]
    fn test_dynsym_membership()
    {
        let mut inputs = LinkInputs::new();
        inputs.shared.push(SharedFile::new("libc.so", "libc.so.6"));
        let config = default_config();
        let mut symtab = SymbolTable::new();

        let mut hidden = Symbol::new("internal", SymbolKind::Defined { file: 0, section: 0, value: 0 });
        hidden.visibility = elf::STV_HIDDEN;
        hidden.must_be_in_dynsym = true;   /* visibility still wins */
        let hidden = symtab.add(hidden);

        let mut imported = Symbol::new("stderr", SymbolKind::Shared { file: 0, value: 0, align: 8 });
        imported.must_be_in_dynsym = true;
        let imported = symtab.add(imported);

        let plain = symtab.add(Symbol::new("helper", SymbolKind::Defined { file: 0, section: 0, value: 0 }));

        assert!(!include_in_dynsym(&symtab, hidden, &config));
        assert!(include_in_dynsym(&symtab, imported, &config));
        assert!(!include_in_dynsym(&symtab, plain, &config));

        /* exporting everything flips the default-visibility cases */
        let mut exporting = default_config();
        exporting.export_dynamic = true;
        assert!(include_in_dynsym(&symtab, plain, &exporting));
        assert!(!include_in_dynsym(&symtab, hidden, &exporting));
    }
}
