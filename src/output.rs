/* Emit the laid-out image to storage
 *
 * Everything is already decided by the time this runs: sizes, offsets,
 * addresses, table contents. The file-level ELF structures go through
 * object's incremental ELF writer: the laid-out bytes are mirrored into
 * its reservations, then the file is filled front to back, with each
 * section's bytes placed at the offset layout chose for it. The writer
 * also owns the section-name table and the header table closing the
 * file.
 *
 * PPC64 is the one ordering wrinkle: .opd carries the function
 * descriptors later sections are resolved against, so its bytes are
 * rendered ahead of everything else.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::os::unix::fs::PermissionsExt;

use goblin::elf::header::{ EM_MIPS, EM_PPC64, ET_DYN, ET_EXEC, ET_REL };
use goblin::elf::sym::{ STB_LOCAL, STT_OBJECT };
use object::endian::Endian;
use object::write::StringId;
use object::write::elf::{ FileHeader, ProgramHeader, SectionHeader, Writer };

use super::config::Config;
use super::context::{ LinkError, OutputImage };
use super::dynamic::{ DynValue, DynamicReloc, RelocLoc, RelocSection };
use super::elf::{ self, push_dyn, push_reloc, push_sym, push_word };
use super::generate;
use super::got::GotSlot;
use super::input::LinkInputs;
use super::section::{ Content, SecId, Synth };
use super::symbols::SymbolTable;
use super::target::TargetOracle;

/* S10: reserve, fill, commit */
pub fn write(image: &mut OutputImage, inputs: &LinkInputs, symtab: &SymbolTable,
             target: &dyn TargetOracle, config: &Config) -> Result<(), LinkError>
{
    let filename = &config.output_file;
    let class = image.class;

    /* the writer borrows section names for its string table, so give it
       copies that outlive it */
    let real: Vec<SecId> = image.real_sections().to_vec();
    let names: Vec<Vec<u8>> = real.iter()
        .map(|id| image.sec(*id).name.clone().into_bytes()).collect();

    /* PPC64 function descriptors are produced before anything that will
       be resolved against them */
    let opd_bytes = match (config.e_machine == EM_PPC64, image.opd)
    {
        (true, Some(opd)) => Some((opd, render_section(image, inputs, symtab, target, config, opd))),
        _ => None
    };

    let mut buffer = Vec::new();
    let mut writer = Writer::new(image.endian, class.is_64(), &mut buffer);

    /* mirror the laid-out file in the writer's reservations: header,
       program headers, then one run covering every section byte */
    writer.reserve_file_header();
    if !config.relocatable && !image.phdrs.is_empty()
    {
        writer.reserve_program_headers(image.phdrs.len() as u32);
    }
    let mut data_end = writer.reserved_len();
    for id in &real
    {
        let section = image.sec(*id);
        if !section.is_nobits()
        {
            data_end = data_end.max((section.file_off + section.size) as usize);
        }
    }
    if data_end > writer.reserved_len()
    {
        let gap = data_end - writer.reserved_len();
        writer.reserve(gap, 1);
    }

    /* one header table entry per ordered section, then the writer's own
       name table; its headers close the file */
    writer.reserve_null_section_index();
    let mut name_ids: Vec<StringId> = Vec::new();
    for name in &names
    {
        name_ids.push(writer.add_section_name(name));
        writer.reserve_section_index();
    }
    writer.reserve_shstrtab_section_index();
    writer.reserve_shstrtab();
    writer.reserve_section_headers();

    /* fill, in reservation order */
    writer.write_file_header(&FileHeader
    {
        os_abi: inputs.first_elf().map(|object| object.os_abi).unwrap_or(0),
        abi_version: 0,
        e_type: output_type(config),
        e_machine: output_machine(inputs, config),
        e_entry: generate::entry_address(image, symtab, config),
        e_flags: output_flags(config)
    }).map_err(|reason| LinkError::Emit
    {
        filename: filename.clone(),
        reason: reason.to_string()
    })?;

    for phdr in &image.phdrs
    {
        writer.write_program_header(&ProgramHeader
        {
            p_type: phdr.p_type,
            p_flags: phdr.p_flags,
            p_offset: phdr.p_offset,
            p_vaddr: phdr.p_vaddr,
            p_paddr: phdr.p_vaddr,
            p_filesz: phdr.p_filesz,
            p_memsz: phdr.p_memsz,
            p_align: phdr.p_align
        });
    }

    for id in &real
    {
        let section = image.sec(*id);
        if section.is_nobits()
        {
            continue;
        }
        writer.pad_until(section.file_off as usize);
        match &opd_bytes
        {
            Some((opd, bytes)) if *opd == *id => writer.write(bytes),
            _ =>
            {
                let bytes = render_section(image, inputs, symtab, target, config, *id);
                writer.write(&bytes);
            }
        }
    }

    writer.write_shstrtab();

    writer.write_null_section_header();
    for (position, id) in real.iter().enumerate()
    {
        let section = image.sec(*id);
        writer.write_section_header(&SectionHeader
        {
            name: Some(name_ids[position]),
            sh_type: section.sh_type,
            sh_flags: section.flags,
            sh_addr: section.va,
            sh_offset: section.file_off,
            sh_size: section.size,
            sh_link: section.link,
            sh_info: section.info,
            sh_addralign: section.align,
            sh_entsize: section.entsize
        });
    }
    writer.write_shstrtab_section_header();

    /* the header table closes the file */
    image.file_size = buffer.len() as u64;
    image.shdr_off = image.file_size - (image.num_shdrs() + 1) * class.shdr_size();

    std::fs::write(filename, &buffer)
        .map_err(|reason| LinkError::Io { filename: filename.clone(), reason })?;
    let mut permissions = std::fs::metadata(filename)
        .map_err(|reason| LinkError::Io { filename: filename.clone(), reason })?
        .permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(filename, permissions)
        .map_err(|reason| LinkError::Io { filename: filename.clone(), reason })?;
    Ok(())
}

fn output_type(config: &Config) -> u16
{
    if config.shared { ET_DYN }
    else if config.relocatable { ET_REL }
    else { ET_EXEC }
}

fn output_machine(inputs: &LinkInputs, config: &Config) -> u16
{
    if config.e_machine != 0
    {
        return config.e_machine;
    }
    match inputs.first_elf()
    {
        Some(object) => object.e_machine,
        None => 0
    }
}

/* MIPS composes its ABI flags; everything else writes none */
fn output_flags(config: &Config) -> u32
{
    if config.e_machine != EM_MIPS
    {
        return 0;
    }
    let mut flags = elf::EF_MIPS_ABI_O32 | elf::EF_MIPS_CPIC | elf::EF_MIPS_ARCH_32R2;
    if config.shared
    {
        flags |= elf::EF_MIPS_PIC;
    }
    flags
}

/* produce one section's bytes */
fn render_section(image: &OutputImage, inputs: &LinkInputs, symtab: &SymbolTable,
                  target: &dyn TargetOracle, config: &Config, id: SecId) -> Vec<u8>
{
    let section = image.sec(id);

    match &section.content
    {
        Content::Aggregate { inputs: contribs, .. } =>
        {
            let mut data = vec![ 0u8; section.size as usize ];
            for contribution in contribs
            {
                let input = inputs.section(contribution.sec);
                if input.is_nobits()
                {
                    continue;
                }
                let at = contribution.offset as usize;
                data[at..at + input.data.len()].copy_from_slice(&input.data);
            }
            data
        },

        Content::Synthetic(which) => match which
        {
            Synth::Interp =>
            {
                let mut data = Vec::new();
                if let Some(path) = &config.dynamic_linker
                {
                    data.extend_from_slice(path.as_bytes());
                }
                data.push(0);
                data
            },

            Synth::Got => render_got(image, symtab, config),
            Synth::GotPlt => render_gotplt(image, target),
            Synth::Plt => render_plt(image, symtab, target),

            Synth::RelaDyn => render_relocs(image, symtab, &image.rela_dyn),
            Synth::RelaPlt => match &image.rela_plt
            {
                Some(rela_plt) => render_relocs(image, symtab, rela_plt),
                None => Vec::new()
            },

            Synth::Dynamic => render_dynamic(image, symtab),
            Synth::DynSymTab => render_symtab(image, inputs, symtab, &image.dynsym),
            Synth::SymTab => match &image.symtab
            {
                Some(symtab_content) => render_symtab(image, inputs, symtab, symtab_content),
                None => Vec::new()
            },

            Synth::StrTab => match &image.strtab
            {
                Some(strtab) => strtab.data().to_vec(),
                None => Vec::new()
            },
            Synth::DynStrTab => image.dynstr.data().to_vec(),

            Synth::HashTab => image.hash_data.clone(),
            Synth::GnuHashTab => image.gnu_hash_data.clone(),

            Synth::EhFrameHdr => render_eh_frame_hdr(image),

            Synth::MipsRldMap => vec![ 0u8; section.size as usize ],

            /* pseudo-sections: their bytes are the file and program
               headers the writer already produced */
            Synth::ElfHeader | Synth::ProgramHeaders => Vec::new()
        }
    }
}

/* GOT words we can resolve now are resolved now; the loader fills the
   rest through .rela.dyn */
fn render_got(image: &OutputImage, symtab: &SymbolTable, config: &Config) -> Vec<u8>
{
    let class = image.class;
    let mut data = Vec::new();

    for _ in 0..image.got.num_mips_local_entries()
    {
        push_word(&mut data, class, image.endian, 0);
    }
    for slot in image.got.slots()
    {
        let value = match slot
        {
            GotSlot::Entry(sym) =>
            {
                let symbol = symtab.get(*sym);
                if symbol.is_tls || symbol.can_be_preempted(config.shared) { 0 }
                else { image.symbol_va(symtab, *sym) }
            },
            _ => 0   /* TLS words belong to the loader */
        };
        push_word(&mut data, class, image.endian, value);
    }
    data
}

fn render_gotplt(image: &OutputImage, target: &dyn TargetOracle) -> Vec<u8>
{
    let gotplt = match &image.gotplt
    {
        Some(gotplt) => gotplt,
        None => return Vec::new()
    };
    let class = image.class;
    let mut data = Vec::new();

    /* word zero points the loader at .dynamic; the next two are its
       scratch space */
    let dynamic_va = if image.is_dynamic { image.sec(image.dynamic_sec).va } else { 0 };
    push_word(&mut data, class, image.endian, dynamic_va);
    push_word(&mut data, class, image.endian, 0);
    push_word(&mut data, class, image.endian, 0);

    let plt_va = image.sec(image.plt_sec).va;
    for (index, _) in gotplt.entries().iter().enumerate()
    {
        let entry_va = plt_va + image.plt_header_size + index as u64 * image.plt_entry_size;
        push_word(&mut data, class, image.endian, target.got_plt_entry_value(entry_va));
    }
    data
}

fn render_plt(image: &OutputImage, symtab: &SymbolTable, target: &dyn TargetOracle) -> Vec<u8>
{
    let class = image.class;
    let plt_va = image.sec(image.plt_sec).va;
    let header = image.plt_header_size as usize;
    let entry_size = image.plt_entry_size as usize;
    let mut data = vec![ 0u8; image.plt.size(image.plt_header_size, image.plt_entry_size) as usize ];

    /* the header trampoline measures against the slot table */
    let slots_va = match image.gotplt_sec
    {
        Some(gotplt_sec) => image.sec(gotplt_sec).va,
        None => image.sec(image.got_sec).va
    };
    target.write_plt_header(&mut data[..header], slots_va, plt_va);

    for (index, sym) in image.plt.entries().iter().enumerate()
    {
        let entry_va = plt_va + header as u64 + index as u64 * entry_size as u64;
        let got_entry_va = match (image.gotplt.as_ref(), symtab.get(*sym).gotplt_index)
        {
            (Some(gotplt), Some(slot)) =>
                image.sec(image.gotplt_sec.unwrap_or(image.got_sec)).va
                    + gotplt.entry_offset(slot, class),
            _ => match symtab.get(*sym).got_index
            {
                Some(slot) => image.sec(image.got_sec).va + image.got.entry_offset(slot, class),
                None => 0
            }
        };
        let at = header + index * entry_size;
        target.write_plt_entry(&mut data[at..at + entry_size], got_entry_va, entry_va, index as u32);
    }
    data
}

/* where a dynamic relocation's site ended up */
fn reloc_site_va(image: &OutputImage, symtab: &SymbolTable, reloc: &DynamicReloc) -> u64
{
    let class = image.class;
    match reloc.loc
    {
        RelocLoc::InSection { section, offset } => image.spot_va(section, offset),
        RelocLoc::Got { index } =>
            image.sec(image.got_sec).va + image.got.entry_offset(index, class),
        RelocLoc::GotPlt { index } => match (&image.gotplt, image.gotplt_sec)
        {
            (Some(gotplt), Some(gotplt_sec)) =>
                image.sec(gotplt_sec).va + gotplt.entry_offset(index, class),
            _ => 0
        },
        RelocLoc::Bss { sym } => match (image.bss, symtab.get(sym).offset_in_bss)
        {
            (Some(bss), Some(offset)) => image.sec(bss).va + offset,
            _ => 0
        },
        RelocLoc::LTlsIndex =>
            image.sec(image.got_sec).va + image.got.tls_index_offset(class),
        RelocLoc::GTlsIndex { sym } => match symtab.get(sym).dyn_tls_index
        {
            Some(index) => image.sec(image.got_sec).va + image.got.entry_offset(index, class),
            None => 0
        },
        RelocLoc::GTlsOffset { sym } => match symtab.get(sym).dyn_tls_index
        {
            Some(index) => image.sec(image.got_sec).va + image.got.entry_offset(index + 1, class),
            None => 0
        }
    }
}

fn render_relocs(image: &OutputImage, symtab: &SymbolTable, relocs: &RelocSection) -> Vec<u8>
{
    let class = image.class;
    let is_rela = class.uses_rela();
    let mut data = Vec::new();

    for reloc in &relocs.relocs
    {
        let mut addend = reloc.addend;
        if reloc.use_sym_va
        {
            if let Some(sym) = reloc.sym
            {
                addend = addend.wrapping_add(image.symbol_va(symtab, sym) as i64);
            }
        }
        if let Some((target_sec, target_off)) = reloc.section_target
        {
            addend = addend.wrapping_add(image.spot_va(target_sec, target_off) as i64);
        }
        if reloc.add_toc_base
        {
            addend = addend.wrapping_add(image.ppc64_toc_base() as i64);
        }

        let r_sym = match (reloc.sym, reloc.use_sym_va)
        {
            (Some(sym), false) => symtab.get(sym).dynsym_index.unwrap_or(0),
            _ => 0
        };

        push_reloc(&mut data, class, image.endian, is_rela,
            reloc_site_va(image, symtab, reloc), r_sym, reloc.rel_type, addend);
    }
    data
}

fn render_dynamic(image: &OutputImage, symtab: &SymbolTable) -> Vec<u8>
{
    let class = image.class;
    let mut data = Vec::new();

    for entry in &image.dynamic.entries
    {
        let value = match entry.val
        {
            DynValue::Plain(value) => value,
            DynValue::SectionVa(sec) => image.sec(sec).va,
            DynValue::SectionSize(sec) => image.sec(sec).size,
            DynValue::SymbolVa(sym) => image.symbol_va(symtab, sym)
        };
        push_dyn(&mut data, class, image.endian, entry.tag, value);
    }
    data
}

fn render_symtab(image: &OutputImage, inputs: &LinkInputs, symtab: &SymbolTable,
                 table: &super::tables::SymTabSection) -> Vec<u8>
{
    let class = image.class;
    let mut data = Vec::new();

    /* the null entry */
    push_sym(&mut data, class, image.endian, 0, 0, 0, 0, 0, 0);

    for kept in &table.locals
    {
        let local = &inputs.objects[kept.file].locals[kept.local];
        let (value, shndx) = match local.section
        {
            Some(section) =>
            {
                let spot = image.spot_va((kept.file, section), local.value);
                let shndx = match image.section_map.get(&(kept.file, section))
                {
                    Some((sec, _)) => image.sec(*sec).shndx as u16,
                    None => elf::SHN_UNDEF
                };
                (spot, shndx)
            },
            None => (local.value, elf::SHN_ABS)
        };
        push_sym(&mut data, class, image.endian, kept.name_off,
            (STB_LOCAL << 4) | (local.sym_type & 0xf), 0, shndx, value, local.size);
    }

    for (sym, name_off) in &table.globals
    {
        let symbol = symtab.get(*sym);
        /* a copy-relocated import reads as data we define ourselves */
        let sym_type = if symbol.needs_copy() { STT_OBJECT } else { symbol.sym_type };
        push_sym(&mut data, class, image.endian, *name_off,
            (symbol.binding << 4) | (sym_type & 0xf), symbol.visibility,
            image.symbol_shndx(symtab, *sym), image.symbol_va(symtab, *sym), symbol.size);
    }
    data
}

/* version, encodings, and a pc-relative pointer at .eh_frame; the
   search table is left to the unwind machinery */
fn render_eh_frame_hdr(image: &OutputImage) -> Vec<u8>
{
    let mut data = vec![ 1, 0x1b, 0xff, 0xff ];   /* version, pcrel sdata4, counts omitted */

    let delta = match image.eh_frame
    {
        Some(eh_frame) =>
        {
            let here = image.sec(image.eh_frame_hdr_sec).va + 4;
            image.sec(eh_frame).va.wrapping_sub(here) as u32
        },
        None => 0
    };
    data.extend_from_slice(&image.endian.write_u32_bytes(delta));
    data
}
