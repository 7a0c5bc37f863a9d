use anyhow::{anyhow, Context};
use clap::Parser;
use cli::{Args, Commands, Language};
use inkleaf_embedded::{FlashPartition, RamNorFlash, SECTOR_SIZE};
use inkleaf_fonts::bank::PartitionBuilder;
use inkleaf_fonts::{blob, rasterizer, FontBank, FontFamily};
use inkleaf_text::hyphenation::{English, Russian, Trie, TrieBuilder};
use inkleaf_text::{
    ContentEvent, FsStorage, Hyphenator, LanguageHyphenator, Section, SectionParams,
};
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{event, Level};

mod cli;

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(if args.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .pretty()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Commands::Rasterize { font, size, output } => rasterize(&font, size, &output),
        Commands::BuildPartition { fonts, output } => build_partition(&fonts, &output),
        Commands::CompilePatterns {
            patterns,
            output,
            language,
            check,
        } => compile_patterns(&patterns, &output, language, &check),
        Commands::Paginate {
            text,
            font,
            dir,
            spine,
            width,
            height,
            patterns,
            language,
            show,
        } => {
            let font = fs::read(&font).with_context(|| format!("reading {}", font.display()))?;
            let text = fs::read_to_string(&text)
                .with_context(|| format!("reading {}", text.display()))?;
            let trie = patterns
                .map(|path| {
                    fs::read(&path).with_context(|| format!("reading {}", path.display()))
                })
                .transpose()?;
            let params = SectionParams {
                font_id: 0,
                line_compression: 1.0,
                extra_paragraph_spacing: true,
                alignment: Default::default(),
                viewport_width: width,
                viewport_height: height,
                hyphenation: trie.is_some(),
                embedded_style: false,
            };
            paginate(
                &text,
                &font,
                trie.as_deref(),
                language,
                &params,
                Section::new(FsStorage::new(&dir), spine),
                &show,
            )
        }
    }
}

fn rasterize(font: &Path, size: u16, output: &Path) -> anyhow::Result<()> {
    let bytes = fs::read(font).with_context(|| format!("reading {}", font.display()))?;
    let mut reported = 0;
    let blob = rasterizer::rasterize(&bytes, size, |progress| {
        if progress >= reported + 10 {
            reported = progress;
            event!(Level::DEBUG, progress, "rasterizing");
        }
    })?;
    let header = blob::parse_header(&blob)?;
    fs::write(output, &blob).with_context(|| format!("writing {}", output.display()))?;
    event!(
        Level::INFO,
        glyphs = header.glyph_count,
        kern_pairs = header.kern_pair_count,
        ligatures = header.ligature_pair_count,
        bytes = blob.len(),
        "font blob written"
    );
    Ok(())
}

/// Splits `group/name=path`.
fn parse_font_spec(spec: &str) -> anyhow::Result<(&str, &str, &str)> {
    let (font, path) = spec
        .split_once('=')
        .ok_or_else(|| anyhow!("{spec}: expected group/name=path"))?;
    let (group, name) = font
        .split_once('/')
        .ok_or_else(|| anyhow!("{spec}: expected group/name before '='"))?;
    if group.is_empty() || name.is_empty() || path.is_empty() {
        return Err(anyhow!("{spec}: group, name and path must all be given"));
    }
    Ok((group, name, path))
}

fn build_partition(fonts: &[String], output: &Path) -> anyhow::Result<()> {
    let mut builder = PartitionBuilder::new();
    for spec in fonts {
        let (group, name, path) = parse_font_spec(spec)?;
        let blob = fs::read(path).with_context(|| format!("reading {path}"))?;
        builder.add_font(group, name, &blob)?;
    }
    let image = builder.build()?;

    // open it the way the device will before handing it out
    let flash = RefCell::new(RamNorFlash::from_image(&image));
    let n_sectors = image.len().div_ceil(SECTOR_SIZE) as u32;
    let bank = FontBank::open(FlashPartition::new(&flash, 0, n_sectors, "fontdata"))?;
    event!(
        Level::INFO,
        groups = %bank.group_names().collect::<Vec<_>>().join(","),
        fonts = bank.font_count(),
        bytes = image.len(),
        "font partition built"
    );

    fs::write(output, &image).with_context(|| format!("writing {}", output.display()))?;
    Ok(())
}

fn hyphenator<'a>(trie: &'a [u8], language: Language) -> anyhow::Result<Box<dyn Hyphenator + 'a>> {
    let trie = Trie::new(trie).ok_or_else(|| anyhow!("hyphenation trie is malformed"))?;
    Ok(match language {
        Language::English => Box::new(LanguageHyphenator::new(trie, English)),
        Language::Russian => Box::new(LanguageHyphenator::new(trie, Russian)),
    })
}

/// `word` with a hyphen at every break.
fn hyphenated(hyphenator: &dyn Hyphenator, word: &str) -> String {
    let breaks = hyphenator.break_indexes(word);
    let mut out = String::with_capacity(word.len() + breaks.len());
    for (i, c) in word.chars().enumerate() {
        if breaks.contains(&i) {
            out.push('-');
        }
        out.push(c);
    }
    out
}

fn compile_patterns(
    patterns: &Path,
    output: &Path,
    language: Language,
    check: &[String],
) -> anyhow::Result<()> {
    let text = fs::read_to_string(patterns)
        .with_context(|| format!("reading {}", patterns.display()))?;
    let trie = TrieBuilder::from_patterns(&text)?.build()?;
    fs::write(output, &trie).with_context(|| format!("writing {}", output.display()))?;
    event!(Level::INFO, bytes = trie.len(), "hyphenation trie written");

    let hyphenator = hyphenator(&trie, language)?;
    for word in check {
        println!("{}", hyphenated(hyphenator.as_ref(), word));
    }
    Ok(())
}

/// Blank lines separate paragraphs.
fn text_events(text: &str) -> impl Iterator<Item = io::Result<ContentEvent>> + '_ {
    text.split("\n\n")
        .filter(|paragraph| !paragraph.trim().is_empty())
        .flat_map(|paragraph| {
            std::iter::once(ContentEvent::ParagraphStart { alignment: None })
                .chain(paragraph.split_whitespace().map(ContentEvent::word))
                .chain(std::iter::once(ContentEvent::ParagraphEnd))
        })
        .map(Ok)
}

fn paginate(
    text: &str,
    font: &[u8],
    trie: Option<&[u8]>,
    language: Language,
    params: &SectionParams,
    mut section: Section<FsStorage>,
    show: &[u16],
) -> anyhow::Result<()> {
    let family = FontFamily::new(blob::parse(font)?);
    let hyphenator = trie.map(|trie| hyphenator(trie, language)).transpose()?;

    if section.load_section_file(params)? {
        event!(Level::INFO, pages = section.page_count(), "section cache is current");
    } else {
        section.create_section_file(
            params,
            &family,
            hyphenator.as_deref(),
            &BTreeSet::new(),
            text_events(text),
        )?;
        event!(Level::INFO, pages = section.page_count(), "section cache built");
    }

    for &n in show {
        let page = section.load_page(n)?;
        println!("--- page {n} ---");
        for line in &page.lines {
            let words: Vec<String> = line
                .block
                .iter()
                .map(|(word, x, _)| format!("{x}:{word}"))
                .collect();
            println!("{:>4} {}", line.y, words.join(" "));
        }
    }
    Ok(())
}
