/* itsywriter
 *
 * Minimalist ELF image writer. Takes a resolved symbol table and the live
 * sections of a set of input objects, decides the final layout of an ELF
 * executable or shared object (sections, segments, symbols, dynamic
 * relocations), and emits the image bytes to a memory-mapped output file
 * in a single pass.
 *
 * The writer deliberately leaves the surrounding linker stages to its
 * callers: command-line parsing, archive/shared-object loading, symbol
 * resolution, garbage collection and the per-architecture relocation
 * formulas all live behind the interfaces in config.rs, target.rs,
 * script.rs and input.rs.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

extern crate toml;
extern crate serde;
extern crate serde_derive;
extern crate goblin;
extern crate object;
extern crate indexmap;
extern crate wildmatch;

#[macro_use]
pub mod debug;   /* reporting faults that end the link */

pub mod config;   /* linker settings, programmatic or from a toml file */
pub mod elf;      /* ELF structure sizes and endian-aware field emission */
pub mod input;    /* borrowed view of the parsed input files */
pub mod symbols;  /* the resolved symbol table we are given to write out */
pub mod target;   /* per-architecture oracle consulted during the scan */
pub mod script;   /* section placement oracle, optionally config-driven */
pub mod section;  /* output sections: the factory, RELRO, ordering */
pub mod got;      /* GOT, GOT.PLT and PLT synthesized sections */
pub mod dynamic;  /* dynamic relocations, .rela.dyn/.rela.plt, .dynamic */
pub mod tables;   /* string/symbol tables, hash tables, .interp and kin */
pub mod context;  /* the output image being assembled */
pub mod scan;     /* relocation scan deciding GOT/PLT/copy/TLS treatment */
pub mod generate; /* the pipeline that assembles the image */
pub mod layout;   /* program header synthesis and address assignment */
pub mod output;   /* final emit through object's incremental ELF writer */

pub use config::Config;
pub use context::{ LinkError, OutputImage };
pub use generate::write_image;
