/* Section placement oracle
 *
 * A linker script engine is a program of its own; the writer only asks
 * three questions of it: where does this input section go, is it
 * discarded outright, and does the script impose an order between two
 * output sections? Anything that can answer those can drive placement.
 *
 * The default implementation is built from the [section.*] blocks of
 * the settings file, matching input section names against wildcard
 * patterns the way the configuration examples do:
 *
 *   [section.text]
 *   include = [ ".entry*", ".init*", ".text*" ]
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use wildmatch::WildMatch;

use super::config::Config;

pub trait ScriptOracle
{
    /* the output section name for an input section, or None for no
       opinion (the writer then applies its built-in rewriting) */
    fn output_section_name(&self, input_section_name: &str) -> Option<String>;

    /* should this input section be dropped from the link? */
    fn is_discarded(&self, input_section_name: &str) -> bool;

    /* relative order of two output sections: negative, zero (no
       opinion) or positive, as a script SECTIONS clause would say */
    fn compare_sections(&self, a: &str, b: &str) -> i32;
}

/* the no-opinion oracle used when no script is in play */
pub struct NullScript;

impl ScriptOracle for NullScript
{
    fn output_section_name(&self, _input_section_name: &str) -> Option<String> { None }
    fn is_discarded(&self, _input_section_name: &str) -> bool { false }
    fn compare_sections(&self, _a: &str, _b: &str) -> i32 { 0 }
}

/* one placement block: these patterns land in this output section */
struct PlacementBlock
{
    output_name: String,
    patterns: Vec<WildMatch>
}

pub struct ConfigScript
{
    blocks: Vec<PlacementBlock>,
    discards: Vec<WildMatch>
}

impl ConfigScript
{
    /* build the oracle from the settings file's placement blocks,
       ranked in the configured block order */
    pub fn from_config(config: &Config) -> ConfigScript
    {
        let mut blocks = Vec::new();

        for block_name in config.placement_order()
        {
            if let Some(placement) = config.section.get(&block_name)
            {
                blocks.push(PlacementBlock
                {
                    /* blocks are named without the leading dot, the
                       output sections carry it */
                    output_name: format!(".{}", block_name),
                    patterns: placement.get_sections_to_include().iter()
                        .map(|pattern| WildMatch::new(pattern)).collect()
                });
            }
        }

        ConfigScript
        {
            blocks,
            discards: config.discard_sections.iter()
                .map(|pattern| WildMatch::new(pattern)).collect()
        }
    }

    fn rank(&self, output_name: &str) -> Option<usize>
    {
        self.blocks.iter().position(|block| block.output_name == output_name)
    }
}

impl ScriptOracle for ConfigScript
{
    fn output_section_name(&self, input_section_name: &str) -> Option<String>
    {
        for block in &self.blocks
        {
            if block.patterns.iter().any(|pattern| pattern.matches(input_section_name))
            {
                return Some(block.output_name.clone());
            }
        }
        None
    }

    fn is_discarded(&self, input_section_name: &str) -> bool
    {
        self.discards.iter().any(|pattern| pattern.matches(input_section_name))
    }

    fn compare_sections(&self, a: &str, b: &str) -> i32
    {
        match (self.rank(a), self.rank(b))
        {
            (Some(rank_a), Some(rank_b)) =>
            {
                if rank_a < rank_b { -1 }
                else if rank_a > rank_b { 1 }
                else { 0 }
            },
            _ => 0   /* unranked sections: no opinion */
        }
    }
}
