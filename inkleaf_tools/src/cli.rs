use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,
    /// Log at debug level
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Rasterize a TrueType or OpenType font into a font blob
    Rasterize {
        font: PathBuf,
        /// Nominal size in points
        #[arg(short, long, default_value_t = 12)]
        size: u16,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Pack font blobs into a font partition image
    BuildPartition {
        /// `group/name=blob.bin`, at least one in the `ui` group
        #[arg(required = true)]
        fonts: Vec<String>,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Compile TeX hyphenation patterns into a trie blob
    CompilePatterns {
        patterns: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short, long, value_enum, default_value_t = Language::English)]
        language: Language,
        /// Words to hyphenate with the compiled trie
        #[arg(long)]
        check: Vec<String>,
    },
    /// Paginate a plain text chapter into a section cache and print its pages
    Paginate {
        text: PathBuf,
        /// Font blob to measure with
        #[arg(short, long)]
        font: PathBuf,
        /// Directory holding the section cache
        #[arg(short, long)]
        dir: PathBuf,
        #[arg(long, default_value_t = 0)]
        spine: usize,
        #[arg(long, default_value_t = 480)]
        width: u16,
        #[arg(long, default_value_t = 800)]
        height: u16,
        /// Trie blob to hyphenate with
        #[arg(long)]
        patterns: Option<PathBuf>,
        #[arg(short, long, value_enum, default_value_t = Language::English)]
        language: Language,
        /// Pages to print
        #[arg(long)]
        show: Vec<u16>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Language {
    English,
    Russian,
}
