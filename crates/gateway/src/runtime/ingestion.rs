//! Document ingestion: chunk, dedup, embed, store.
//!
//! Chunking splits on paragraph boundaries with overlap; oversized
//! chunks are re-split on sentence boundaries, then word boundaries as
//! a last resort. Every output chunk is at most `chunk_size` long and,
//! overlap aside, concatenation covers the input.

use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use spark_domain::error::{Error, Result};
use spark_providers::Embedder;
use spark_store::SparkStore;

use crate::state::AppState;

/// ~1000 chars per chunk.
const CHUNK_SIZE: usize = 1000;
/// 200-char overlap carried between adjacent chunks.
const CHUNK_OVERLAP: usize = 200;

const FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Chunking
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

fn sentence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[.!?]\s+").expect("static regex"))
}

/// Split text into chunks at paragraph boundaries with overlap.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let paragraphs: Vec<&str> = paragraph_re()
        .split(trimmed)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for para in paragraphs {
        if !current.is_empty() && current.len() + para.len() + 2 > chunk_size {
            chunks.push(current.trim().to_string());

            // Carry the tail of the finished chunk into the next one.
            if overlap > 0 && current.len() > overlap {
                let tail_start = floor_char_boundary(&current, current.len() - overlap);
                current = format!("{}\n\n{para}", &current[tail_start..]);
            } else {
                current = para.to_string();
            }
        } else if current.is_empty() {
            current = para.to_string();
        } else {
            current.push_str("\n\n");
            current.push_str(para);
        }
    }
    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }

    // Post-pass: anything still oversized splits on sentence/word bounds.
    let mut final_chunks = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if chunk.len() > chunk_size {
            final_chunks.extend(split_oversized_chunk(&chunk, chunk_size));
        } else {
            final_chunks.push(chunk);
        }
    }
    final_chunks
}

/// Split an oversized chunk on sentence boundaries, then word boundaries.
fn split_oversized_chunk(chunk: &str, chunk_size: usize) -> Vec<String> {
    let mut sub_chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(chunk) {
        let mut sentence = sentence;

        // A single sentence beyond chunk_size splits at word boundaries.
        while sentence.len() > chunk_size {
            let cap = floor_char_boundary(&sentence, chunk_size);
            let space_idx = sentence[..cap].rfind(' ').filter(|&i| i > 0).unwrap_or(cap);
            if !current.is_empty() {
                sub_chunks.push(std::mem::take(&mut current).trim().to_string());
            }
            sub_chunks.push(sentence[..space_idx].trim().to_string());
            sentence = sentence[space_idx..].trim().to_string();
        }

        if current.is_empty() {
            current = sentence;
        } else if current.len() + sentence.len() + 1 > chunk_size {
            sub_chunks.push(std::mem::take(&mut current).trim().to_string());
            current = sentence;
        } else {
            current.push(' ');
            current.push_str(&sentence);
        }
    }

    if !current.trim().is_empty() {
        sub_chunks.push(current.trim().to_string());
    }
    sub_chunks.retain(|c| !c.is_empty());
    sub_chunks
}

/// Split on sentence endings, keeping the terminator with its sentence.
fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut last = 0;
    for m in sentence_re().find_iter(text) {
        // The match is terminator + whitespace; keep the terminator.
        let end = m.start() + 1;
        out.push(text[last..end].trim().to_string());
        last = m.end();
    }
    if last < text.len() {
        let rest = text[last..].trim();
        if !rest.is_empty() {
            out.push(rest.to_string());
        }
    }
    out
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    if idx >= s.len() {
        return s.len();
    }
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn content_hash(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML stripping
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn chrome_res() -> &'static [Regex] {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    // Script/style bodies plus navigational chrome, removed wholesale.
    // One regex per element so mismatched pairs can't swallow content.
    RES.get_or_init(|| {
        ["script", "style", "nav", "footer", "header"]
            .iter()
            .map(|tag| {
                Regex::new(&format!(r"(?is)<{tag}[^>]*>.*?</{tag}>")).expect("static regex")
            })
            .collect()
    })
}

fn block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)<(?:p|div|br|h[1-6]|li|tr)[^>]*>").expect("static regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n\s*\n+").expect("static regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("static regex"))
}

/// Extract readable text from an HTML page.
pub fn strip_html(html: &str) -> String {
    let mut text = html.to_string();
    for re in chrome_res() {
        text = re.replace_all(&text, "").into_owned();
    }
    let text = block_re().replace_all(&text, "\n");
    let text = tag_re().replace_all(&text, "");

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");

    let text = blank_lines_re().replace_all(&text, "\n\n");
    let text = spaces_re().replace_all(&text, " ");
    text.trim().to_string()
}

/// Content types we accept for URL ingestion. PDF gets a dedicated
/// message since it's the common failure.
pub fn validate_content_type(content_type: &str) -> Result<()> {
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if mime.contains("pdf") {
        return Err(Error::Validation(
            "PDF ingestion is not yet supported. Please paste the text content directly.".into(),
        ));
    }
    if !mime.is_empty() && mime != "text/plain" && !mime.contains("html") {
        return Err(Error::Validation(format!(
            "Unsupported content type: {content_type}. Supported types: text/html, text/plain"
        )));
    }
    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ingestion
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Chunk text, embed new chunks, and store them. Returns the number of
/// chunks inserted (hash-duplicates are skipped).
pub async fn ingest_text(
    state: &AppState,
    client_id: Uuid,
    content: &str,
    title: Option<&str>,
    source_type: &str,
    source_url: Option<&str>,
) -> Result<usize> {
    let chunks = chunk_text(content, CHUNK_SIZE, CHUNK_OVERLAP);
    if chunks.is_empty() {
        return Ok(0);
    }

    // Re-ingesting a URL replaces its chunks wholesale.
    if let Some(url) = source_url {
        state
            .store
            .delete_documents_by_source(client_id, url)
            .await?;
    }

    let hashes: Vec<String> = chunks.iter().map(|c| content_hash(c)).collect();

    let existing: Vec<String> = if source_url.is_some() {
        // Everything was just deleted; skip the dedup lookup.
        Vec::new()
    } else {
        state
            .store
            .existing_document_hashes(client_id, &hashes)
            .await?
    };

    let new_items: Vec<(usize, &String, &String)> = chunks
        .iter()
        .zip(hashes.iter())
        .enumerate()
        .filter(|(_, (_, h))| !existing.contains(h))
        .map(|(i, (c, h))| (i, c, h))
        .collect();

    if new_items.is_empty() {
        tracing::info!(chunks = chunks.len(), "ingestion: all chunks already exist");
        return Ok(0);
    }

    let new_texts: Vec<String> = new_items.iter().map(|(_, c, _)| (*c).clone()).collect();
    let embeddings = state.embeddings.embed_batch(&new_texts).await?;

    let rows: Vec<serde_json::Value> = new_items
        .iter()
        .zip(embeddings.iter())
        .map(|((idx, chunk, hash), embedding)| {
            serde_json::json!({
                "client_id": client_id,
                "content": chunk,
                "embedding": embedding,
                "title": title,
                "source_type": source_type,
                "source_url": source_url,
                "chunk_index": idx,
                "content_hash": hash,
            })
        })
        .collect();

    let inserted = rows.len();
    state.store.insert_documents(rows).await?;

    tracing::info!(
        inserted,
        skipped = chunks.len() - inserted,
        client_id = %client_id,
        "ingestion complete"
    );
    Ok(inserted)
}

/// Fetch a URL, strip HTML, and ingest the text under that source URL.
pub async fn ingest_url(
    state: &AppState,
    client_id: Uuid,
    url: &str,
    title: Option<&str>,
) -> Result<usize> {
    let http = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .build()
        .map_err(|e| Error::Http(e.to_string()))?;

    let resp = http
        .get(url)
        .send()
        .await
        .map_err(|e| Error::Http(format!("fetching {url}: {e}")))?;

    if !resp.status().is_success() {
        return Err(Error::Validation(format!(
            "URL returned HTTP {}",
            resp.status()
        )));
    }

    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    validate_content_type(&content_type)?;

    let raw = resp
        .text()
        .await
        .map_err(|e| Error::Http(format!("reading {url}: {e}")))?;

    let mime = content_type.split(';').next().unwrap_or("").trim();
    let content = if mime.eq_ignore_ascii_case("text/plain") {
        raw.trim().to_string()
    } else {
        strip_html(&raw)
    };

    if content.is_empty() {
        tracing::warn!(url = %url, "URL ingestion extracted no content");
        return Ok(0);
    }

    ingest_text(
        state,
        client_id,
        &content,
        Some(title.unwrap_or(url)),
        "url",
        Some(url),
    )
    .await
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 1000, 200).is_empty());
        assert!(chunk_text("   \n\n  ", 1000, 200).is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("One short paragraph.", 1000, 200);
        assert_eq!(chunks, vec!["One short paragraph."]);
    }

    #[test]
    fn paragraphs_accumulate_until_the_cap() {
        let text = "First para.\n\nSecond para.\n\nThird para.";
        let chunks = chunk_text(text, 1000, 0);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].contains("First para."));
        assert!(chunks[0].contains("Third para."));
    }

    #[test]
    fn every_chunk_respects_the_size_cap() {
        let text = "A sentence of reasonable length sits here. ".repeat(200);
        for chunk in chunk_text(&text, 500, 100) {
            assert!(chunk.len() <= 500, "chunk of {} bytes", chunk.len());
        }
    }

    #[test]
    fn chunks_cover_the_input() {
        let paragraphs: Vec<String> = (0..30)
            .map(|i| format!("Paragraph number {i} with some words in it."))
            .collect();
        let text = paragraphs.join("\n\n");
        let chunks = chunk_text(&text, 200, 50);

        // Every paragraph appears in at least one chunk.
        for para in &paragraphs {
            assert!(
                chunks.iter().any(|c| c.contains(para.as_str())),
                "missing: {para}"
            );
        }
    }

    #[test]
    fn overlap_carries_tail_between_chunks() {
        let a = "A".repeat(400);
        let b = "B".repeat(400);
        let text = format!("{a}\n\n{b}");
        let chunks = chunk_text(&text, 450, 100);
        assert!(chunks.len() >= 2);
        // The second chunk starts with the tail of the first.
        assert!(chunks[1].starts_with(&"A".repeat(100)));
    }

    #[test]
    fn oversized_single_word_is_hard_split() {
        let text = "x".repeat(2500);
        let chunks = chunk_text(&text, 1000, 0);
        assert!(chunks.iter().all(|c| c.len() <= 1000));
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert_eq!(total, 2500);
    }

    #[test]
    fn sentences_split_with_terminators_kept() {
        let out = split_sentences("First one. Second one! Third?");
        assert_eq!(out, vec!["First one.", "Second one!", "Third?"]);
    }

    #[test]
    fn strip_html_removes_chrome_and_tags() {
        let html = r#"<html><head><style>.x{color:red}</style></head>
<body><nav>Menu</nav><h1>Title</h1><p>Hello &amp; welcome.</p>
<script>alert(1)</script><footer>fine print</footer></body></html>"#;
        let out = strip_html(html);
        assert!(out.contains("Title"));
        assert!(out.contains("Hello & welcome."));
        assert!(!out.contains("Menu"));
        assert!(!out.contains("alert"));
        assert!(!out.contains("fine print"));
        assert!(!out.contains('<'));
    }

    #[test]
    fn content_type_pdf_is_rejected_specifically() {
        let err = validate_content_type("application/pdf").unwrap_err();
        assert!(err.to_string().contains("PDF"));
    }

    #[test]
    fn content_type_html_and_plain_accepted() {
        assert!(validate_content_type("text/html; charset=utf-8").is_ok());
        assert!(validate_content_type("text/plain").is_ok());
        assert!(validate_content_type("application/xhtml+xml").is_ok());
        assert!(validate_content_type("").is_ok());
    }

    #[test]
    fn content_type_binary_is_rejected() {
        assert!(validate_content_type("image/png").is_err());
        assert!(validate_content_type("application/octet-stream").is_err());
    }

    #[test]
    fn content_hash_is_stable_hex_sha256() {
        let h = content_hash("hello");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("hello"));
        assert_ne!(h, content_hash("hello "));
    }
}
