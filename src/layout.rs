/* Build program headers and assign addresses
 *
 * Segments are runs of ordered output sections sharing load flags.
 * Addresses honor each section's alignment, bumped to a page at every
 * load-segment boundary (and after the RELRO region) so the loader can
 * set permissions. TLS NOBITS is the one oddity: it occupies the TLS
 * template virtually but neither file bytes nor load-segment address
 * space.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashSet;

use super::config::Config;
use super::context::{ OutputImage, Phdr };
use super::elf::{ self, align_to };
use super::section::{ is_relro, OutputSection, SecId };
use super::target::TargetOracle;

/* project section flags onto segment access flags */
fn to_phdr_flags(section: &OutputSection) -> u32
{
    use goblin::elf::program_header::{ PF_R, PF_W, PF_X };
    let mut flags = PF_R;
    if section.is_writable()
    {
        flags |= PF_W;
    }
    if section.is_exec()
    {
        flags |= PF_X;
    }
    flags
}

/* AMDGPU loads flagged sections through HSA-specific segment kinds */
fn load_segment_type(config: &Config, section: &OutputSection) -> u32
{
    use goblin::elf::program_header::PT_LOAD;
    if config.e_machine != elf::EM_AMDGPU
    {
        return PT_LOAD;
    }
    if section.flags & elf::SHF_AMDGPU_HSA_CODE != 0
    {
        return elf::PT_AMDGPU_HSA_LOAD_CODE_AGENT;
    }
    if section.flags & elf::SHF_AMDGPU_HSA_GLOBAL != 0
        && section.flags & elf::SHF_AMDGPU_HSA_AGENT == 0
    {
        return elf::PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM;
    }
    PT_LOAD
}

/* S8: decide the program headers and which sections live in each */
pub fn create_phdrs(image: &mut OutputImage, config: &Config)
{
    use goblin::elf::program_header::{ PF_R, PF_W, PT_DYNAMIC, PT_GNU_EH_FRAME, PT_GNU_RELRO,
                                       PT_GNU_STACK, PT_INTERP, PT_LOAD, PT_PHDR, PT_TLS };

    let mut phdrs: Vec<Phdr> = Vec::new();

    /* PT_PHDR describes the header table itself */
    if let Some(program_headers) = image.program_headers
    {
        let mut phdr = Phdr::new(PT_PHDR, PF_R);
        phdr.add_section(program_headers, image.sec(program_headers));
        phdrs.push(phdr);
    }

    /* PT_INTERP must come before any load segment */
    if let Some(interp) = image.interp
    {
        let mut phdr = Phdr::new(PT_INTERP, to_phdr_flags(image.sec(interp)));
        phdr.add_section(interp, image.sec(interp));
        phdrs.push(phdr);
    }

    /* the first load segment starts at the file header */
    let mut flags = PF_R;
    let mut load = Phdr::new(PT_LOAD, flags);
    load.add_section(image.elf_header, image.sec(image.elf_header));

    let mut tls = Phdr::new(PT_TLS, PF_R);
    let mut relro = Phdr::new(PT_GNU_RELRO, PF_R);
    let mut loads: Vec<Phdr> = Vec::new();

    for id in image.order.clone()
    {
        let section = image.sec(id);
        if !section.is_alloc()
        {
            break;   /* ordering put every allocatable section first */
        }

        /* collect the TLS template wherever its pieces land */
        if section.is_tls()
        {
            tls.add_section(id, section);
        }

        if !section.needs_pt_load()
        {
            continue;
        }

        /* an access change starts a new load segment */
        let new_flags = to_phdr_flags(section);
        if flags != new_flags
        {
            loads.push(load);
            load = Phdr::new(load_segment_type(config, section), new_flags);
            flags = new_flags;
        }

        load.add_section(id, section);

        if is_relro(config, section)
        {
            relro.add_section(id, section);
        }
    }
    loads.push(load);
    phdrs.extend(loads);

    if tls.first.is_some()
    {
        phdrs.push(tls);
    }

    if image.is_dynamic
    {
        let mut phdr = Phdr::new(PT_DYNAMIC, to_phdr_flags(image.sec(image.dynamic_sec)));
        phdr.add_section(image.dynamic_sec, image.sec(image.dynamic_sec));
        phdrs.push(phdr);
    }

    if relro.first.is_some()
    {
        phdrs.push(relro);
    }

    if image.eh_frame_hdr_live
    {
        let mut phdr = Phdr::new(PT_GNU_EH_FRAME, to_phdr_flags(image.sec(image.eh_frame_hdr_sec)));
        phdr.add_section(image.eh_frame_hdr_sec, image.sec(image.eh_frame_hdr_sec));
        phdrs.push(phdr);
    }

    /* ask the loader for a non-executable stack unless told otherwise */
    if !config.z_execstack
    {
        phdrs.push(Phdr::new(PT_GNU_STACK, PF_R | PF_W));
    }

    image.phdrs = phdrs;
}

/* S9: file offsets and virtual addresses for every ordered section,
   then the segment extents that depend on them */
pub fn assign_addresses(image: &mut OutputImage, target: &dyn TargetOracle, config: &Config)
{
    use goblin::elf::program_header::{ PT_GNU_RELRO, PT_LOAD, PT_TLS };

    let class = image.class;
    let elf_header = image.elf_header;
    image.sections[elf_header].size = class.ehdr_size();
    if let Some(program_headers) = image.program_headers
    {
        image.sections[program_headers].size = image.phdrs.len() as u64 * class.phdr_size();
    }

    /* the first section of each load segment, and the first section
       after the RELRO region, sit on a page boundary so permissions
       can be set per page */
    let mut page_align: HashSet<SecId> = HashSet::new();
    for phdr in &image.phdrs
    {
        if phdr.p_type == PT_GNU_RELRO
        {
            if let Some(last) = phdr.last
            {
                if let Some(position) = image.order.iter().position(|id| *id == last)
                {
                    if let Some(next) = image.order.get(position + 1)
                    {
                        if image.sec(*next).needs_pt_load()
                        {
                            page_align.insert(*next);
                        }
                    }
                }
            }
        }
        if phdr.p_type == PT_LOAD || phdr.p_type == elf::PT_AMDGPU_HSA_LOAD_CODE_AGENT
            || phdr.p_type == elf::PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM
        {
            if let Some(first) = phdr.first
            {
                page_align.insert(first);
            }
        }
    }

    let page_size = target.page_size();
    let mut thread_bss_offset: u64 = 0;
    let mut va = target.va_start(config.shared);
    let mut file_off: u64 = 0;

    for id in image.order.clone()
    {
        let mut align = image.sec(id).align;
        if page_align.contains(&id)
        {
            align = align.max(page_size);
        }

        /* NOBITS costs no file bytes */
        if !image.sec(id).is_nobits()
        {
            file_off = align_to(file_off, align);
        }
        image.sections[id].file_off = file_off;
        if !image.sec(id).is_nobits()
        {
            file_off = file_off + image.sec(id).size;
        }

        if image.sec(id).needs_pt_load()
        {
            va = align_to(va, align);
            image.sections[id].va = va;
            va = va + image.sec(id).size;
        }
        else if image.sec(id).is_tls() && image.sec(id).is_nobits()
        {
            /* the TLS zero-fill image sits virtually past the ordinary
               sections without consuming load-segment space */
            let tva = align_to(va + thread_bss_offset, align);
            image.sections[id].va = tva;
            thread_bss_offset = tva - va + image.sec(id).size;
        }
    }

    image.end_va = va;

    /* segment extents follow from their first and last sections */
    for index in 0..image.phdrs.len()
    {
        let (first, last, p_type) =
        {
            let phdr = &image.phdrs[index];
            (phdr.first, phdr.last, phdr.p_type)
        };
        if let (Some(first), Some(last)) = (first, last)
        {
            let first_off = image.sec(first).file_off;
            let first_va = image.sec(first).va;
            let last_sec = image.sec(last);
            let mut filesz = last_sec.file_off - first_off;
            if !last_sec.is_nobits()
            {
                filesz = filesz + last_sec.size;
            }
            let memsz = last_sec.va + last_sec.size - first_va;

            let phdr = &mut image.phdrs[index];
            phdr.p_offset = first_off;
            phdr.p_vaddr = first_va;
            phdr.p_filesz = filesz;
            phdr.p_memsz = memsz;
        }

        let phdr = &mut image.phdrs[index];
        if p_type == PT_LOAD || p_type == elf::PT_AMDGPU_HSA_LOAD_CODE_AGENT
            || p_type == elf::PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM
        {
            phdr.p_align = page_size;
        }
        else if p_type == PT_GNU_RELRO
        {
            phdr.p_align = 1;
        }

        /* the thread pointer lands right past the TLS template; round
           the size so offsets computed from it stay correct */
        if p_type == PT_TLS
        {
            image.tls_phdr = Some(index);
            if phdr.p_align > 1
            {
                phdr.p_memsz = align_to(phdr.p_memsz, phdr.p_align);
            }
        }
    }
}

/* relocatable output takes no segments; sections simply follow the
   file header */
pub fn assign_addresses_relocatable(image: &mut OutputImage)
{
    let class = image.class;
    let elf_header = image.elf_header;
    image.sections[elf_header].size = class.ehdr_size();

    let mut file_off: u64 = 0;
    for id in image.order.clone()
    {
        let align = image.sec(id).align;
        if !image.sec(id).is_nobits()
        {
            file_off = align_to(file_off, align);
        }
        image.sections[id].file_off = file_off;
        if !image.sec(id).is_nobits()
        {
            file_off = file_off + image.sec(id).size;
        }
    }
}
