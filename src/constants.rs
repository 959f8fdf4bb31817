//! Prompt templates. Placeholders in `{braces}` are substituted verbatim;
//! the templates themselves are opaque copy and carry no logic.

pub const EXTRACT_SYSTEM: &str =
    "You extract structured company facts from raw website text. Reply with JSON only.";

pub const EXTRACT_PROMPT: &str = r#"Below is text scraped from {url}.

Extract the following JSON object, using empty strings or empty arrays when a
field cannot be determined. Do not invent facts.

{"companyName": "", "industry": "", "targetAudience": "", "painPoints": [], "offer": "", "testimonials": []}

Website text:
{text}"#;

pub const CHAPTER_SYSTEM: &str =
    "You are a professional business ghostwriter producing one ebook chapter at a time.";

/// Reply format is the fixed delimiter convention parsed by
/// `chapters::parse_chapter_reply`.
pub const CHAPTER_PROMPT: &str = r#"Write chapter {number} of {total} for a lead-magnet ebook.

Company: {company}
Industry: {industry}
Audience: {audience}
Pain points: {pain_points}
Offer: {offer}
Extra notes: {notes}

Chapters already written (do not repeat them):
{prior_titles}

Reply exactly in this format:
h2{number}: <chapter title> ### content{number}: <600-900 words of chapter body> ###"#;

pub const TITLE_SYSTEM: &str = "You name ebooks. Reply with the title only, no quotes.";

pub const TITLE_PROMPT: &str = r#"Suggest a compelling lead-magnet ebook title for {company},
a {industry} business serving {audience}. One line, at most 10 words."#;

pub const COVER_PROMPT: &str = r#"Minimalist professional ebook cover for "{title}",
clean typography, flat design, {industry} theme, no text besides the title."#;
