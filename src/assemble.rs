//! Document assembly: chapters plus front/back matter rendered to XHTML
//! fragments, then handed to container libraries (EPUB via `epub-builder`,
//! PDF via `printpdf`). No bespoke binary-format work happens here.

use crate::model::{Chapter, CompanyProfile};
use anyhow::{anyhow, Context, Result};
use epub_builder::{EpubBuilder, EpubContent, ReferenceType, ZipLibrary};
use printpdf::{BuiltinFont, Mm, PdfDocument};
use std::io::BufWriter;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const WRAP_COLS: usize = 90;
const LINES_PER_PAGE: usize = 46;

/// One document section in reading order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub href: String,
    pub title: String,
    pub xhtml: String,
}

/// Introduction copy templated from the profile. Kept deterministic so a
/// degraded LLM run still produces complete front matter.
pub fn introduction_text(title: &str, profile: &CompanyProfile) -> String {
    format!(
        "Welcome to \"{}\", prepared by {} for {}. The chapters ahead walk \
         through the challenges we see most often and the practical steps that \
         address them.",
        title, profile.company_name, profile.target_audience
    )
}

/// Conclusion copy templated from the profile.
pub fn conclusion_text(profile: &CompanyProfile) -> String {
    let offer = if profile.offer.trim().is_empty() {
        "reach out to learn how we can help".to_string()
    } else {
        format!("learn more about {}", profile.offer.trim())
    };
    format!(
        "Thank you for reading. If this guide resonated, visit {} to {}.",
        profile.website_url, offer
    )
}

/// All sections in reading order: introduction, each chapter, conclusion.
/// Order preservation here is what guarantees no chapter is dropped from
/// either container.
pub fn build_sections(
    title: &str,
    profile: &CompanyProfile,
    chapters: &[Chapter],
) -> Vec<Section> {
    let mut sections = Vec::with_capacity(chapters.len() + 2);
    sections.push(Section {
        href: "introduction.xhtml".to_string(),
        title: "Introduction".to_string(),
        xhtml: wrap_xhtml(
            "Introduction",
            &format!("<p>{}</p>", escape_html(&introduction_text(title, profile))),
        ),
    });
    for chapter in chapters {
        sections.push(Section {
            href: format!("chapter_{}.xhtml", chapter.number),
            title: chapter.title.clone(),
            xhtml: wrap_xhtml(&chapter.title, &chapter_body_html(chapter)),
        });
    }
    sections.push(Section {
        href: "conclusion.xhtml".to_string(),
        title: "Conclusion".to_string(),
        xhtml: wrap_xhtml(
            "Conclusion",
            &format!("<p>{}</p>", escape_html(&conclusion_text(profile))),
        ),
    });
    sections
}

/// Chapter body as escaped paragraphs; blank lines delimit paragraphs.
pub fn chapter_body_html(chapter: &Chapter) -> String {
    let mut out = format!("<h2>{}</h2>\n", escape_html(&chapter.title));
    for para in paragraphs(&chapter.content) {
        out.push_str("<p>");
        out.push_str(&escape_html(&para));
        out.push_str("</p>\n");
    }
    out
}

fn wrap_xhtml(title: &str, body: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head><title>{}</title></head>\n<body>\n{}</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn paragraphs(content: &str) -> Vec<String> {
    content
        .split("\n\n")
        .map(|p| p.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|p| !p.is_empty())
        .collect()
}

pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Assemble the EPUB container. Sections keep their reading order; the
/// inline TOC lists every chapter.
pub fn build_epub(title: &str, profile: &CompanyProfile, chapters: &[Chapter]) -> Result<Vec<u8>> {
    let sections = build_sections(title, profile, chapters);

    // epub-builder's error type is not a std error, so convert it by hand.
    let zip = ZipLibrary::new().map_err(|e| anyhow!("epub zip backend: {e}"))?;
    let mut builder = EpubBuilder::new(zip).map_err(|e| anyhow!("epub builder: {e}"))?;
    builder
        .metadata("title", title)
        .and_then(|b| b.metadata("author", &profile.company_name))
        .map_err(|e| anyhow!("epub metadata: {e}"))?;
    builder.inline_toc();

    for (idx, section) in sections.iter().enumerate() {
        let reftype = if idx == 0 {
            ReferenceType::Preface
        } else {
            ReferenceType::Text
        };
        builder
            .add_content(
                EpubContent::new(&section.href, section.xhtml.as_bytes())
                    .title(&section.title)
                    .reftype(reftype),
            )
            .map_err(|e| anyhow!("epub content {}: {e}", section.href))?;
    }

    let mut output = Vec::new();
    builder
        .generate(&mut output)
        .map_err(|e| anyhow!("epub generate: {e}"))?;
    Ok(output)
}

/// Assemble the PDF: title page, then each section as wrapped plain text
/// with the builtin Helvetica face. Deliberately naive layout.
pub fn build_pdf(title: &str, profile: &CompanyProfile, chapters: &[Chapter]) -> Result<Vec<u8>> {
    let sections = build_sections(title, profile, chapters);

    let (doc, first_page, first_layer) =
        PdfDocument::new(title, Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "text");
    let font = doc
        .add_builtin_font(BuiltinFont::Helvetica)
        .context("builtin pdf font")?;
    let bold = doc
        .add_builtin_font(BuiltinFont::HelveticaBold)
        .context("builtin pdf font")?;

    // Title page.
    {
        let layer = doc.get_page(first_page).get_layer(first_layer);
        layer.use_text(title, 24.0, Mm(20.0), Mm(200.0), &bold);
        layer.use_text(&profile.company_name, 14.0, Mm(20.0), Mm(185.0), &font);
    }

    for section in &sections {
        let mut lines = vec![section.title.clone(), String::new()];
        lines.extend(section_plain_lines(section));

        for page_lines in lines.chunks(LINES_PER_PAGE) {
            let (page, layer_idx) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "text");
            let layer = doc.get_page(page).get_layer(layer_idx);
            let mut y = 275.0;
            for (idx, line) in page_lines.iter().enumerate() {
                let is_heading = idx == 0 && line == &section.title;
                let face = if is_heading { &bold } else { &font };
                let size = if is_heading { 16.0 } else { 11.0 };
                if !line.is_empty() {
                    layer.use_text(line, size, Mm(20.0), Mm(y), face);
                }
                y -= 5.5;
            }
        }
    }

    let mut output = BufWriter::new(Vec::new());
    doc.save(&mut output).context("pdf save")?;
    Ok(output.into_inner().context("pdf buffer")?)
}

fn section_plain_lines(section: &Section) -> Vec<String> {
    // Strip the markup back to text; the XHTML was built from escaped
    // paragraphs, so tags are the only markup present.
    let mut lines = Vec::new();
    for para in section
        .xhtml
        .split("<p>")
        .skip(1)
        .filter_map(|rest| rest.split("</p>").next())
    {
        let text = unescape_html(para);
        lines.extend(wrap_text(&text, WRAP_COLS));
        lines.push(String::new());
    }
    lines
}

fn unescape_html(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
}

/// Greedy word wrap at `cols` characters; words longer than a line get a
/// line of their own.
pub fn wrap_text(text: &str, cols: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current = word.to_string();
        } else if current.chars().count() + 1 + word.chars().count() <= cols {
            current.push(' ');
            current.push_str(word);
        } else {
            lines.push(std::mem::take(&mut current));
            current = word.to_string();
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}
