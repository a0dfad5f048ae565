/* Parse and hold the link settings
 *
 * The writer can be driven programmatically by filling in a Config, or
 * from a toml settings file in the same shape. The [section.*] blocks
 * describe where input sections are placed and feed the default
 * placement oracle in script.rs.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use serde_derive::Deserialize;
use std::collections::HashMap;

use super::elf::ElfClass;

/* the ld-compatible section blocks consulted when no block order is
   given in the settings file */
pub const STANDARD_ORDER: [&str; 4] = [ "text", "rodata", "data", "bss" ];

#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByteOrder
{
    Little,
    Big
}

impl ByteOrder
{
    pub fn to_endianness(self) -> object::endian::Endianness
    {
        match self
        {
            ByteOrder::Little => object::endian::Endianness::Little,
            ByteOrder::Big => object::endian::Endianness::Big
        }
    }

    /* the EI_DATA identification byte for this order */
    pub fn encoding(self) -> u8
    {
        match self
        {
            ByteOrder::Little => goblin::elf::header::ELFDATA2LSB,
            ByteOrder::Big => goblin::elf::header::ELFDATA2MSB
        }
    }
}

/* what to do with local symbols when building .symtab */
#[derive(Clone, Copy, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discard
{
    None,     /* keep every local the assembler kept */
    Locals,   /* drop assembler-temporary .L* locals */
    All       /* drop every local */
}

#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config
{
    /* where the image goes and what flavor it is */
    pub output_file: String,
    pub class: ElfClass,
    pub byte_order: ByteOrder,
    pub e_machine: u16,       /* 0 = take from the first input object */
    pub mips64_el: bool,

    /* entry point: a symbol wins over a raw address */
    pub entry_symbol: Option<String>,
    pub entry_address: Option<u64>,

    /* link mode */
    pub shared: bool,
    pub relocatable: bool,
    pub dynamic_linker: Option<String>,
    pub soname: Option<String>,

    /* symbol table shaping */
    pub strip_all: bool,
    pub discard: Discard,
    pub export_dynamic: bool,
    pub gnu_hash: bool,
    pub sysv_hash: bool,

    /* undefined-symbol policy */
    pub no_undefined: bool,
    pub no_inhibit_exec: bool,
    pub allow_undefined: bool,   /* -z undefs */

    /* -z toggles affecting layout */
    pub z_relro: bool,
    pub z_now: bool,
    pub z_execstack: bool,

    /* init/fini entry points recorded in .dynamic when defined */
    pub init_symbol: String,
    pub fini_symbol: String,

    /* MIPS pseudo-symbols that never need dynamic relocations */
    pub mips_gp_disp_symbol: String,
    pub mips_local_gp_symbol: String,

    pub print_gc_sections: bool,

    /* placement blocks: output section name -> input patterns */
    pub section: HashMap<String, Placement>,
    pub section_order: Vec<String>,
    pub discard_sections: Vec<String>
}

impl Config
{
    /* which block order the placement oracle should rank by */
    pub fn placement_order(&self) -> Vec<String>
    {
        if !self.section_order.is_empty()
        {
            return self.section_order.clone();
        }
        STANDARD_ORDER.iter().map(|name| String::from(*name)).collect()
    }
}

impl Default for Config
{
    fn default() -> Config { default_config() }
}

#[derive(Clone, Deserialize)]
pub struct Placement
{
    include: Vec<String>
}

impl Placement
{
    pub fn get_sections_to_include(&self) -> &Vec<String> { &self.include }
}

/* load the given file into memory and parse it, returning the settings */
pub fn parse_config(filename: &String) -> Config
{
    let config_contents = match std::fs::read_to_string(filename)
    {
        Ok(c) => c,
        Err(e) => fatal_msg!("Can't read settings file {}: {}", filename, e)
    };

    match toml::from_str(config_contents.as_str())
    {
        Ok(c) => c,
        Err(e) => fatal_msg!("Can't parse settings file {}: {}", filename, e)
    }
}

/* generate a basic, default configuration: a little-endian ELF64
   executable laid out the way GNU ld would lay it out */
pub fn default_config() -> Config
{
    Config
    {
        output_file: String::from("a.out"),
        class: ElfClass::Elf64,
        byte_order: ByteOrder::Little,
        e_machine: 0,
        mips64_el: false,

        entry_symbol: Some(String::from("_start")),
        entry_address: None,

        shared: false,
        relocatable: false,
        dynamic_linker: None,
        soname: None,

        strip_all: false,
        discard: Discard::None,
        export_dynamic: false,
        gnu_hash: false,
        sysv_hash: true,

        no_undefined: false,
        no_inhibit_exec: false,
        allow_undefined: false,

        z_relro: true,
        z_now: false,
        z_execstack: false,

        init_symbol: String::from("_init"),
        fini_symbol: String::from("_fini"),

        mips_gp_disp_symbol: String::from("_gp_disp"),
        mips_local_gp_symbol: String::from("__gnu_local_gp"),

        print_gc_sections: false,

        section: HashMap::new(),
        section_order: Vec::new(),
        discard_sections: Vec::new()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_defaults()
    {
        let config = default_config();
        assert_eq!(config.class, ElfClass::Elf64);
        assert_eq!(config.byte_order, ByteOrder::Little);
        assert!(config.z_relro);
        assert!(!config.shared);
        assert_eq!(config.placement_order(), vec![ "text", "rodata", "data", "bss" ]);
    }

    #[test]
    fn test_parse_toml_form()
    {
        let settings = r#"
            output_file = "demo.elf"
            shared = true
            class = "elf64"
            byte_order = "little"
            discard = "locals"
            section_order = [ "text", "data" ]

            [section.text]
            include = [ ".text*" ]

            [section.data]
            include = [ ".data*", ".sdata*" ]
        "#;
        let config: Config = toml::from_str(settings).unwrap();
        assert_eq!(config.output_file, "demo.elf");
        assert!(config.shared);
        assert_eq!(config.discard, Discard::Locals);
        assert_eq!(config.placement_order(), vec![ "text", "data" ]);
        assert_eq!(config.section.get("data").unwrap().get_sections_to_include().len(), 2);
    }
}
