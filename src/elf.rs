/* itsywriter ELF structure layout
 *
 * One implementation covers all four image flavors (ELF64/ELF32 in either
 * byte order). Structure sizes switch on the class tag; the file-level
 * structures (header, program headers, section headers) are serialized
 * by object's ELF writer during emit, so what lives here is only the
 * record-level layout knowledge the writer doesn't cover: symbols,
 * relocations and dynamic entries, whose field order changes between the
 * classes, appended through object's endian accessors.
 *
 * Constants the goblin crate doesn't carry (processor-specific section
 * types, AMDGPU HSA flags, the odd dynamic tag) are defined here next to
 * the ones we re-export from it.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use object::endian::{ Endian, Endianness };

/* widen goblin's u32 section flags to the u64 we carry them around as */
pub const SHF_WRITE:     u64 = goblin::elf::section_header::SHF_WRITE as u64;
pub const SHF_ALLOC:     u64 = goblin::elf::section_header::SHF_ALLOC as u64;
pub const SHF_EXECINSTR: u64 = goblin::elf::section_header::SHF_EXECINSTR as u64;
pub const SHF_MERGE:     u64 = goblin::elf::section_header::SHF_MERGE as u64;
pub const SHF_STRINGS:   u64 = goblin::elf::section_header::SHF_STRINGS as u64;
pub const SHF_GROUP:     u64 = goblin::elf::section_header::SHF_GROUP as u64;
pub const SHF_TLS:       u64 = goblin::elf::section_header::SHF_TLS as u64;

/* AMDGPU HSA section flags steering PT_LOAD substitution */
pub const SHF_AMDGPU_HSA_GLOBAL: u64 = 0x0010_0000;
pub const SHF_AMDGPU_HSA_CODE:   u64 = 0x0040_0000;
pub const SHF_AMDGPU_HSA_AGENT:  u64 = 0x0080_0000;

/* GNU as emits .eh_frame as SHT_PROGBITS or SHT_X86_64_UNWIND depending
   on the construct; we canonicalize to the latter on x86-64 */
pub const SHT_X86_64_UNWIND: u32 = 0x7000_0001;

/* AMDGPU HSA loader segments that replace PT_LOAD for flagged sections */
pub const PT_AMDGPU_HSA_LOAD_GLOBAL_PROGRAM: u32 = 0x6000_0000;
pub const PT_AMDGPU_HSA_LOAD_CODE_AGENT:     u32 = 0x6000_0003;

/* special section header indexes */
pub const SHN_UNDEF:  u16 = 0;
pub const SHN_ABS:    u16 = 0xfff1;
pub const SHN_COMMON: u16 = 0xfff2;

/* symbol visibility, held in st_other */
pub const STV_DEFAULT:   u8 = 0;
pub const STV_INTERNAL:  u8 = 1;
pub const STV_HIDDEN:    u8 = 2;
pub const STV_PROTECTED: u8 = 3;

/* dynamic tags and flags goblin predates or keeps private */
pub const DT_GNU_HASH:       u64 = 0x6fff_fef5;
pub const DT_FLAGS:          u64 = 30;
pub const DT_PREINIT_ARRAY:  u64 = 32;
pub const DT_PREINIT_ARRAYSZ: u64 = 33;
pub const DT_MIPS_RLD_MAP:   u64 = 0x7000_0016;
pub const DF_BIND_NOW:       u64 = 0x8;

/* machines and relocations consulted by the scanner's special cases */
pub const EM_AMDGPU: u16 = 224;
pub const R_PPC64_RELATIVE: u32 = 22;
pub const R_PPC64_TOC:      u32 = 51;
pub const R_MIPS_LO16:      u32 = 6;
pub const R_MIPS_GOT16:     u32 = 9;
pub const R_MIPS_CALL16:    u32 = 11;

/* MIPS e_flags we compose for the output header */
pub const EF_MIPS_PIC:      u32 = 0x0000_0002;
pub const EF_MIPS_CPIC:     u32 = 0x0000_0004;
pub const EF_MIPS_ABI_O32:  u32 = 0x0000_1000;
pub const EF_MIPS_ARCH_32R2: u32 = 0x7000_0000;

/* the image is parametric in word size; everything else hangs off this */
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde_derive::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElfClass
{
    Elf32,
    Elf64
}

impl ElfClass
{
    pub fn is_64(self) -> bool { self == ElfClass::Elf64 }

    /* size in bytes of a machine word in the image */
    pub fn word_size(self) -> u64 { if self.is_64() { 8 } else { 4 } }

    /* 64-bit images carry explicit addends, 32-bit images do not */
    pub fn uses_rela(self) -> bool { self.is_64() }

    /* fixed structure sizes, by class */
    pub fn ehdr_size(self) -> u64 { if self.is_64() { 64 } else { 52 } }
    pub fn phdr_size(self) -> u64 { if self.is_64() { 56 } else { 32 } }
    pub fn shdr_size(self) -> u64 { if self.is_64() { 64 } else { 40 } }
    pub fn sym_size(self)  -> u64 { if self.is_64() { 24 } else { 16 } }
    pub fn dyn_size(self)  -> u64 { if self.is_64() { 16 } else { 8 } }

    /* size of one relocation record as configured for this image */
    pub fn reloc_size(self) -> u64
    {
        match (self.is_64(), self.uses_rela())
        {
            (true,  true)  => 24,
            (true,  false) => 16,
            (false, true)  => 12,
            (false, false) => 8
        }
    }
}

/* round value up to the next multiple of align. an alignment of zero or
   one leaves the value untouched. alignments are powers of two */
pub fn align_to(value: u64, align: u64) -> u64
{
    if align < 2
    {
        return value;
    }
    (value + align - 1) & !(align - 1)
}

/* append one class-sized word in the image's byte order */
pub fn push_word(data: &mut Vec<u8>, class: ElfClass, endian: Endianness, value: u64)
{
    if class.is_64()
    {
        data.extend_from_slice(&endian.write_u64_bytes(value));
    }
    else
    {
        data.extend_from_slice(&endian.write_u32_bytes(value as u32));
    }
}

/* append one symbol record. the 32-bit layout interleaves the value and
   size between the name and the info bytes; the 64-bit one does not */
pub fn push_sym(data: &mut Vec<u8>, class: ElfClass, endian: Endianness,
                st_name: u32, st_info: u8, st_other: u8, st_shndx: u16,
                st_value: u64, st_size: u64)
{
    data.extend_from_slice(&endian.write_u32_bytes(st_name));
    if class.is_64()
    {
        data.push(st_info);
        data.push(st_other);
        data.extend_from_slice(&endian.write_u16_bytes(st_shndx));
        data.extend_from_slice(&endian.write_u64_bytes(st_value));
        data.extend_from_slice(&endian.write_u64_bytes(st_size));
    }
    else
    {
        data.extend_from_slice(&endian.write_u32_bytes(st_value as u32));
        data.extend_from_slice(&endian.write_u32_bytes(st_size as u32));
        data.push(st_info);
        data.push(st_other);
        data.extend_from_slice(&endian.write_u16_bytes(st_shndx));
    }
}

/* append one relocation record, with or without the explicit addend */
pub fn push_reloc(data: &mut Vec<u8>, class: ElfClass, endian: Endianness, is_rela: bool,
                  r_offset: u64, r_sym: u32, r_type: u32, r_addend: i64)
{
    push_word(data, class, endian, r_offset);
    if class.is_64()
    {
        data.extend_from_slice(&endian.write_u64_bytes(((r_sym as u64) << 32) | r_type as u64));
        if is_rela
        {
            data.extend_from_slice(&endian.write_u64_bytes(r_addend as u64));
        }
    }
    else
    {
        data.extend_from_slice(&endian.write_u32_bytes((r_sym << 8) | (r_type & 0xff)));
        if is_rela
        {
            data.extend_from_slice(&endian.write_u32_bytes(r_addend as u32));
        }
    }
}

/* append one dynamic entry: tag word then value word */
pub fn push_dyn(data: &mut Vec<u8>, class: ElfClass, endian: Endianness, tag: u64, val: u64)
{
    push_word(data, class, endian, tag);
    push_word(data, class, endian, val);
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_align_to()
    {
        assert_eq!(align_to(0, 16), 0);
        assert_eq!(align_to(1, 16), 16);
        assert_eq!(align_to(16, 16), 16);
        assert_eq!(align_to(17, 8), 24);
        assert_eq!(align_to(5, 0), 5);
        assert_eq!(align_to(5, 1), 5);
    }

    #[test]
    fn test_structure_sizes()
    {
        assert_eq!(ElfClass::Elf64.ehdr_size(), 64);
        assert_eq!(ElfClass::Elf32.ehdr_size(), 52);
        assert_eq!(ElfClass::Elf64.reloc_size(), 24);
        assert_eq!(ElfClass::Elf32.reloc_size(), 8);
        assert_eq!(ElfClass::Elf64.sym_size(), 24);
        assert_eq!(ElfClass::Elf32.sym_size(), 16);
    }

    #[test]
    fn test_word_byte_orders()
    {
        let mut little = Vec::new();
        push_word(&mut little, ElfClass::Elf64, Endianness::Little, 0x11223344);
        assert_eq!(&little, &[ 0x44, 0x33, 0x22, 0x11, 0, 0, 0, 0 ]);

        let mut big = Vec::new();
        push_word(&mut big, ElfClass::Elf64, Endianness::Big, 0x11223344);
        assert_eq!(&big, &[ 0, 0, 0, 0, 0x11, 0x22, 0x33, 0x44 ]);

        /* a 32-bit word narrows */
        let mut narrow = Vec::new();
        push_word(&mut narrow, ElfClass::Elf32, Endianness::Little, 0x8000_0000);
        assert_eq!(&narrow, &[ 0x00, 0x00, 0x00, 0x80 ]);
    }

    #[test]
    fn test_sym_record_layouts()
    {
        /* 64-bit: name, info, other, shndx, value, size */
        let mut wide = Vec::new();
        push_sym(&mut wide, ElfClass::Elf64, Endianness::Little, 7, 0x12, 2, 3, 0x1000, 16);
        assert_eq!(wide.len() as u64, ElfClass::Elf64.sym_size());
        assert_eq!(wide[4], 0x12);
        assert_eq!(u64::from_le_bytes(wide[8..16].try_into().unwrap()), 0x1000);

        /* 32-bit: name, value, size, info, other, shndx */
        let mut narrow = Vec::new();
        push_sym(&mut narrow, ElfClass::Elf32, Endianness::Little, 7, 0x12, 2, 3, 0x1000, 16);
        assert_eq!(narrow.len() as u64, ElfClass::Elf32.sym_size());
        assert_eq!(u32::from_le_bytes(narrow[4..8].try_into().unwrap()), 0x1000);
        assert_eq!(narrow[12], 0x12);
    }

    #[test]
    fn test_reloc_info_packing()
    {
        /* ELF64 packs the symbol index in the upper 32 bits of r_info */
        let mut wide = Vec::new();
        push_reloc(&mut wide, ElfClass::Elf64, Endianness::Little, true, 0x1000, 5, 8, -8);
        assert_eq!(wide.len(), 24);
        assert_eq!(u64::from_le_bytes(wide[8..16].try_into().unwrap()), (5u64 << 32) | 8);
        assert_eq!(i64::from_le_bytes(wide[16..24].try_into().unwrap()), -8);

        /* ELF32 REL: no addend, sym in the upper 24 bits */
        let mut narrow = Vec::new();
        push_reloc(&mut narrow, ElfClass::Elf32, Endianness::Little, false, 0x1000, 5, 2, 0);
        assert_eq!(narrow.len(), 8);
        assert_eq!(u32::from_le_bytes(narrow[4..8].try_into().unwrap()), (5 << 8) | 2);
    }

    #[test]
    fn test_dyn_entry_width()
    {
        let mut wide = Vec::new();
        push_dyn(&mut wide, ElfClass::Elf64, Endianness::Little, 5, 0x400000);
        assert_eq!(wide.len() as u64, ElfClass::Elf64.dyn_size());

        let mut narrow = Vec::new();
        push_dyn(&mut narrow, ElfClass::Elf32, Endianness::Big, 5, 0x400000);
        assert_eq!(narrow.len() as u64, ElfClass::Elf32.dyn_size());
        assert_eq!(u32::from_be_bytes(narrow[0..4].try_into().unwrap()), 5);
    }
}
