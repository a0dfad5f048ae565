/* String, symbol and hash tables
 *
 * These are the synthesized sections whose contents are pure
 * bookkeeping: interned names, symbol records, and the two lookup
 * acceleration tables (.hash and .gnu.hash). Sizes are all known at
 * finalization; only symbol values wait for layout.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use object::endian::{ Endian, Endianness };

use super::elf::ElfClass;
use super::symbols::SymbolId;

/* an ELF string table: NUL-led, NUL-separated */
pub struct StringTable
{
    data: Vec<u8>
}

impl StringTable
{
    pub fn new() -> StringTable
    {
        StringTable { data: vec![ 0 ] }
    }

    /* intern a string, returning its offset */
    pub fn add_string(&mut self, s: &str) -> u32
    {
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.data.push(0);
        offset
    }

    pub fn size(&self) -> u64 { self.data.len() as u64 }

    pub fn data(&self) -> &[u8] { &self.data }
}

/* a local symbol kept for .symtab: where it came from and its interned
   name */
#[derive(Clone, Copy)]
pub struct KeptLocal
{
    pub file: usize,
    pub local: usize,
    pub name_off: u32
}

/* .symtab or .dynsym in the making: kept locals ahead of globals, with
   the leading null entry implied. names are interned into the partner
   string table as symbols arrive, so sizes are final before layout */
pub struct SymTabSection
{
    pub locals: Vec<KeptLocal>,
    pub globals: Vec<(SymbolId, u32)>   /* symbol + interned name offset */
}

impl SymTabSection
{
    pub fn new() -> SymTabSection
    {
        SymTabSection { locals: Vec::new(), globals: Vec::new() }
    }

    pub fn add_local(&mut self, file: usize, local: usize, name_off: u32)
    {
        self.locals.push(KeptLocal { file, local, name_off });
    }

    pub fn add_symbol(&mut self, sym: SymbolId, name_off: u32)
    {
        self.globals.push((sym, name_off));
    }

    pub fn num_entries(&self) -> u64
    {
        1 + self.locals.len() as u64 + self.globals.len() as u64
    }

    /* sh_info: index of the first non-local entry */
    pub fn first_global_index(&self) -> u32
    {
        1 + self.locals.len() as u32
    }

    pub fn size(&self, class: ElfClass) -> u64
    {
        self.num_entries() * class.sym_size()
    }
}

/* the classic SysV ELF hash */
pub fn sysv_hash(name: &str) -> u32
{
    let mut h: u32 = 0;
    for byte in name.bytes()
    {
        h = (h << 4).wrapping_add(byte as u32);
        let g = h & 0xf000_0000;
        if g != 0
        {
            h ^= g >> 24;
        }
        h &= !g;
    }
    h
}

/* the GNU hash (djb2 times 33) */
pub fn gnu_hash(name: &str) -> u32
{
    let mut h: u32 = 5381;
    for byte in name.bytes()
    {
        h = h.wrapping_mul(33).wrapping_add(byte as u32);
    }
    h
}

/* build .hash: nbucket, nchain, buckets, chains. takes each hashed
   symbol as (dynsym index, hash); nchain spans the whole dynsym */
pub fn build_sysv_hash(endian: Endianness, dynsym_count: u32, hashed: &[(u32, u32)]) -> Vec<u8>
{
    let nbucket = hashed.len().max(1) as u32;
    let mut buckets = vec![ 0u32; nbucket as usize ];
    let mut chains = vec![ 0u32; dynsym_count as usize ];

    /* chain each symbol in front of its bucket's previous head */
    for (dynsym_index, hash) in hashed
    {
        let bucket = (hash % nbucket) as usize;
        chains[*dynsym_index as usize] = buckets[bucket];
        buckets[bucket] = *dynsym_index;
    }

    let mut data = Vec::new();
    let mut put = |v: u32| data.extend_from_slice(&endian.write_u32_bytes(v));
    put(nbucket);
    put(dynsym_count);
    for b in &buckets { put(*b); }
    for c in &chains { put(*c); }
    data
}

/* build .gnu.hash for symbols already sitting in bucket-sorted order at
   the tail of .dynsym. symoffset is the dynsym index of the first
   hashed symbol; hashes arrive in final dynsym order */
pub fn build_gnu_hash(class: ElfClass, endian: Endianness, symoffset: u32, hashes: &[u32]) -> Vec<u8>
{
    let nbuckets = (hashes.len().max(1) as u32).next_power_of_two();
    let bloom_shift: u32 = if class.is_64() { 6 } else { 5 };
    let bloom_bits = (class.word_size() * 8) as u32;

    /* one maskword of bloom filter */
    let mut bloom_word: u64 = 0;
    for h in hashes
    {
        bloom_word |= 1u64 << (h % bloom_bits);
        bloom_word |= 1u64 << ((h >> bloom_shift) % bloom_bits);
    }

    /* bucket heads and the chain values, with the stop bit on the last
       entry of each bucket */
    let mut buckets = vec![ 0u32; nbuckets as usize ];
    let mut chains = vec![ 0u32; hashes.len() ];
    for (i, h) in hashes.iter().enumerate()
    {
        let bucket = (h % nbuckets) as usize;
        if buckets[bucket] == 0
        {
            buckets[bucket] = symoffset + i as u32;
        }
        chains[i] = h & !1;
        let last_of_bucket = i + 1 == hashes.len() || (hashes[i + 1] % nbuckets) as usize != bucket;
        if last_of_bucket
        {
            chains[i] |= 1;
        }
    }

    let mut data = Vec::new();
    {
        let mut put32 = |data: &mut Vec<u8>, v: u32| data.extend_from_slice(&endian.write_u32_bytes(v));
        put32(&mut data, nbuckets);
        put32(&mut data, symoffset);
        put32(&mut data, 1);             /* maskwords */
        put32(&mut data, bloom_shift);
        if class.is_64()
        {
            data.extend_from_slice(&endian.write_u64_bytes(bloom_word));
        }
        else
        {
            put32(&mut data, bloom_word as u32);
        }
        for b in &buckets { put32(&mut data, *b); }
        for c in &chains { put32(&mut data, *c); }
    }
    data
}

/* expected byte size of the .gnu.hash built above */
pub fn gnu_hash_size(class: ElfClass, hashed_count: usize) -> u64
{
    let nbuckets = (hashed_count.max(1) as u64).next_power_of_two();
    16 + class.word_size() + nbuckets * 4 + hashed_count as u64 * 4
}
