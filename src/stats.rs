//! Project statistics.
//!
//! A quick summary of what a project holds: tag counts per category,
//! leftover raw text, descriptions, relationships per type and loops. Used
//! by `pidtag stats` to check an extraction or linking run did what was
//! expected.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::progress::format_number;
use crate::project_io::load_project;

/// Run the stats command: load the project and print a summary.
pub fn run_stats(project_path: &Path) -> Result<()> {
    let project = load_project(project_path)?;
    let stats = project.stats();

    println!("P&ID Tagger: Project Stats");
    println!("==========================");
    println!();
    println!("  Project:       {}", project_path.display());
    println!("  PDF:           {}", project.pdf_file_name);
    println!("  Pages:         {}", format_number(stats.pages as u64));
    println!();
    print_table("Tags", &stats.tags_by_category);
    println!();
    println!("  Raw items:     {}", format_number(stats.raw_text_items as u64));
    println!("  Descriptions:  {}", format_number(stats.descriptions as u64));
    println!("  Loops:         {}", format_number(stats.loops as u64));
    println!();
    print_table("Relationships", &stats.relationships_by_type);
    Ok(())
}

fn print_table(title: &str, counts: &BTreeMap<&'static str, usize>) {
    let total: usize = counts.values().sum();
    println!("  {}: {}", title, format_number(total as u64));
    for (name, count) in counts {
        println!("    {:<20} {:>8}", name, format_number(*count as u64));
    }
}
