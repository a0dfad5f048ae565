/* The resolved symbol table the writer is handed
 *
 * Resolution across inputs happens before the writer runs: exactly one
 * definition has already won for every name. The writer reads the
 * winners, flips per-symbol flags while scanning relocations, and adds
 * its own linker-defined symbols whose values are only known after
 * layout.
 *
 * Symbols are held in an arena and referred to by index everywhere, so
 * sections, files and relocations can cross-reference them freely.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::collections::HashMap;

use goblin::elf::sym::{ STB_GLOBAL, STB_WEAK, STT_FUNC, STT_NOTYPE };

use super::elf::STV_DEFAULT;
use super::input::LinkInputs;
use super::section::SecId;

pub type SymbolId = usize;

/* where a synthetic symbol sits within its output section */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Anchor
{
    Start,
    End
}

/* the variants a resolved name can end up as */
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolKind
{
    /* defined at an offset into an input section */
    Defined { file: usize, section: usize, value: u64 },

    /* a common block: no home until it is packed into .bss */
    DefinedCommon { size: u64, align: u64 },

    /* a fixed value with no backing section */
    DefinedAbsolute { value: u64 },

    /* unresolved; weak or tolerated undefineds keep the link alive */
    Undefined { weak: bool, can_keep: bool },

    /* defined by a shared library taking part in the link */
    Shared { file: usize, value: u64, align: u64 },

    /* linker-made, anchored to an output section edge */
    Synthetic { section: SecId, anchor: Anchor },

    /* a sentinel definition that satisfies references but is never
       emitted (e.g. __tls_get_addr in a static link) */
    Ignored
}

pub struct Symbol
{
    pub name: String,
    pub kind: SymbolKind,
    pub binding: u8,
    pub sym_type: u8,
    pub visibility: u8,
    pub size: u64,

    /* flags accumulated while scanning */
    pub is_used_in_regular_obj: bool,
    pub is_tls: bool,
    pub must_be_in_dynsym: bool,
    pub needs_copy_or_plt_addr: bool,

    /* slots handed out during the scan; each is claimed at most once */
    pub got_index: Option<u32>,
    pub gotplt_index: Option<u32>,
    pub plt_index: Option<u32>,
    pub dyn_tls_index: Option<u32>,   /* first GOT slot of the module/offset pair */

    /* position in .dynsym, assigned when that table is finalized */
    pub dynsym_index: Option<u32>,

    /* home in .bss for commons and copy-relocated symbols */
    pub offset_in_bss: Option<u64>
}

impl Symbol
{
    pub fn new(name: &str, kind: SymbolKind) -> Symbol
    {
        Symbol
        {
            name: String::from(name),
            kind,
            binding: STB_GLOBAL,
            sym_type: STT_NOTYPE,
            visibility: STV_DEFAULT,
            size: 0,
            is_used_in_regular_obj: false,
            is_tls: false,
            must_be_in_dynsym: false,
            needs_copy_or_plt_addr: false,
            got_index: None,
            gotplt_index: None,
            plt_index: None,
            dyn_tls_index: None,
            dynsym_index: None,
            offset_in_bss: None
        }
    }

    pub fn is_undefined(&self) -> bool
    {
        matches!(self.kind, SymbolKind::Undefined { .. })
    }

    pub fn is_weak(&self) -> bool
    {
        self.binding == STB_WEAK
    }

    pub fn is_shared(&self) -> bool
    {
        matches!(self.kind, SymbolKind::Shared { .. })
    }

    pub fn is_func(&self) -> bool
    {
        self.sym_type == STT_FUNC
    }

    pub fn is_in_got(&self) -> bool
    {
        self.got_index.is_some()
    }

    pub fn is_in_plt(&self) -> bool
    {
        self.plt_index.is_some()
    }

    /* a shared data symbol referenced directly gets its storage copied
       into our .bss; functions get a PLT address instead */
    pub fn needs_copy(&self) -> bool
    {
        self.is_shared() && self.needs_copy_or_plt_addr && !self.is_func()
    }

    /* can another loaded object override this symbol at run time?
       anything from a shared library or still undefined can be; our own
       definitions only when we are building a shared object and the
       symbol is exported with default visibility */
    pub fn can_be_preempted(&self, shared_output: bool) -> bool
    {
        if self.visibility != STV_DEFAULT
        {
            return false;
        }
        match self.kind
        {
            SymbolKind::Shared { .. } => true,
            SymbolKind::Undefined { .. } => true,
            SymbolKind::Ignored => false,
            _ => shared_output
        }
    }
}

/* the arena of resolved symbols, indexed by name for the writer's own
   lookups and linker-defined additions */
pub struct SymbolTable
{
    symbols: Vec<Symbol>,
    by_name: HashMap<String, SymbolId>
}

impl SymbolTable
{
    pub fn new() -> SymbolTable
    {
        SymbolTable { symbols: Vec::new(), by_name: HashMap::new() }
    }

    pub fn len(&self) -> usize { self.symbols.len() }

    pub fn get(&self, id: SymbolId) -> &Symbol { &self.symbols[id] }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol { &mut self.symbols[id] }

    pub fn find(&self, name: &str) -> Option<SymbolId>
    {
        self.by_name.get(name).copied()
    }

    pub fn ids(&self) -> std::ops::Range<SymbolId>
    {
        0..self.symbols.len()
    }

    /* insert a resolved symbol. resolution is the loader's business, so
       a duplicate name here is a bug in the caller */
    pub fn add(&mut self, symbol: Symbol) -> SymbolId
    {
        let id = self.symbols.len();
        if self.by_name.insert(symbol.name.clone(), id).is_some()
        {
            fatal_msg!("Duplicate symbol {} given to the writer", symbol.name);
        }
        self.symbols.push(symbol);
        id
    }

    /* turn an existing entry into an absolute definition (or create
       one), preserving the reference flags already gathered. used for
       _end, _etext and friends whose values are patched after layout */
    pub fn add_absolute(&mut self, name: &str) -> SymbolId
    {
        match self.find(name)
        {
            Some(id) =>
            {
                let sym = self.get_mut(id);
                sym.kind = SymbolKind::DefinedAbsolute { value: 0 };
                id
            },
            None =>
            {
                let mut sym = Symbol::new(name, SymbolKind::DefinedAbsolute { value: 0 });
                sym.visibility = super::elf::STV_HIDDEN;
                self.add(sym)
            }
        }
    }

    /* bind a name to the start or end of an output section */
    pub fn add_synthetic(&mut self, name: &str, section: SecId, anchor: Anchor) -> SymbolId
    {
        match self.find(name)
        {
            Some(id) =>
            {
                let sym = self.get_mut(id);
                sym.kind = SymbolKind::Synthetic { section, anchor };
                id
            },
            None =>
            {
                let mut sym = Symbol::new(name, SymbolKind::Synthetic { section, anchor });
                sym.visibility = super::elf::STV_HIDDEN;
                self.add(sym)
            }
        }
    }

    /* satisfy references to a name without ever emitting it */
    pub fn add_ignored(&mut self, name: &str) -> SymbolId
    {
        match self.find(name)
        {
            Some(id) =>
            {
                self.get_mut(id).kind = SymbolKind::Ignored;
                id
            },
            None => self.add(Symbol::new(name, SymbolKind::Ignored))
        }
    }

    /* name the input file that defined or referenced a symbol, for
       diagnostics */
    pub fn find_file<'a>(&self, inputs: &'a LinkInputs, id: SymbolId) -> Option<&'a str>
    {
        match self.get(id).kind
        {
            SymbolKind::Defined { file, .. } => Some(inputs.objects[file].name.as_str()),
            SymbolKind::Shared { file, .. } => Some(inputs.shared[file].name.as_str()),
            _ =>
            {
                for object in &inputs.objects
                {
                    for slot in &object.symbols
                    {
                        if let super::input::SymSlot::Global(sym) = slot
                        {
                            if *sym == id
                            {
                                return Some(object.name.as_str());
                            }
                        }
                    }
                }
                None
            }
        }
    }
}
