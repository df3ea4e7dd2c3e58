//! Article enrichment — fetch full articles and generate real summaries.
//!
//! Feed teasers are 100-200 characters. This stage reads the actual articles
//! for the selected stories and produces summaries substantial enough that
//! the reader does not need to click through.
//!
//! Runs AFTER expert council selection, so only the final selected stories
//! get fetched.
//!
//! Summarization priority:
//! 1. Gemini API (fast, generous free tier)
//! 2. Anthropic Claude (high quality, requires paid key)
//! 3. Extractive (always available, no API key)
//!
//! Every fetch passes an SSRF gate and a per-host rate limiter. A fetch or
//! summarization failure leaves the candidate's original summary intact.

use std::net::IpAddr;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};

use futures::stream::{self, StreamExt};
use lru::LruCache;
use regex::Regex;
use reqwest::Url;

use crate::config::{ApiKeys, EnrichmentConfig, ExpertCouncilConfig};
use crate::types::CandidateItem;

/// Minimum interval between fetches to one host.
const DOMAIN_MIN_INTERVAL: Duration = Duration::from_millis(500);
/// Cap on the per-host limiter table.
const DOMAIN_TABLE_CAP: usize = 500;
/// Minimum extracted article length worth summarizing.
const MIN_ARTICLE_CHARS: usize = 100;

const BOILERPLATE_PATTERN: &str = concat!(
    r"(?i)(cookie|subscribe|sign up|newsletter|advertisement|read more",
    r"|share this|follow us|related articles|recommended|most popular",
    r"|copyright \d{4}|all rights reserved|terms of service|privacy policy",
    r"|hide caption|toggle caption|image source|getty images|ap photo",
    r"|click here|tap here|download the app|more on this story",
    r"|you may also like|sponsored content)",
);

fn boilerplate_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, BOILERPLATE_PATTERN)
}

#[allow(clippy::expect_used)]
fn regex_static(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    // Patterns are compile-time constants; a failure here is a programming bug.
    cell.get_or_init(|| Regex::new(pattern).expect("valid static regex"))
}

fn script_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"(?is)<script[^>]*>.*?</script>")
}

fn style_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"(?is)<style[^>]*>.*?</style>")
}

fn comment_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"(?s)<!--.*?-->")
}

fn nav_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(
        &RE,
        r"(?is)<(nav|header|footer|aside|form|menu|iframe|noscript)[^>]*>.*?</(nav|header|footer|aside|form|menu|iframe|noscript)>",
    )
}

fn article_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"(?is)<article[^>]*>(.*?)</article>")
}

fn paragraph_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"(?is)<p[^>]*>(.*?)</p>")
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"<[^>]+>")
}

fn entity_caps_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"\b[A-Z][a-z]+(?:\s+[A-Z][a-z]+)*\b")
}

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    regex_static(&RE, r"\b\d[\d,.]*\b")
}

// ============================================================================
// SSRF gate
// ============================================================================

/// Reject URLs that could reach internal infrastructure: non-http schemes,
/// empty hosts, loopback/private/link-local ranges, and cloud metadata
/// endpoints, for both IPv4 and IPv6 literals.
pub fn is_fetchable_url(raw: &str) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
        return false;
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return !is_blocked_ip(ip);
    }
    true
}

fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let octets = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                // Cloud metadata endpoint
                || octets == [169, 254, 169, 254]
                // Carrier-grade NAT 100.64.0.0/10
                || (octets[0] == 100 && (64..128).contains(&octets[1]))
        }
        IpAddr::V6(v6) => {
            let segments = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // Unique local fc00::/7
                || (segments[0] & 0xfe00) == 0xfc00
                // Link-local fe80::/10
                || (segments[0] & 0xffc0) == 0xfe80
                // IPv4-mapped — recheck the embedded address
                || v6.to_ipv4_mapped().is_some_and(|v4| is_blocked_ip(IpAddr::V4(v4)))
        }
    }
}

// ============================================================================
// Article text extraction
// ============================================================================

/// Extract clean article text from raw HTML.
///
/// Lightweight readability approach: strip scripts/styles/nav/comments,
/// prefer `<article>` content, then `<p>` paragraphs, filtering boilerplate.
/// Falls back to whole-document tag stripping.
pub fn extract_article_text(html: &str) -> String {
    let text = script_re().replace_all(html, "");
    let text = style_re().replace_all(&text, "");
    let text = comment_re().replace_all(&text, "");
    let text = nav_re().replace_all(&text, "");

    let scope = match article_re().captures(&text) {
        Some(caps) => caps
            .get(1)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| text.to_string()),
        None => text.to_string(),
    };

    let mut cleaned: Vec<String> = Vec::new();
    for caps in paragraph_re().captures_iter(&scope) {
        let Some(p) = caps.get(1) else { continue };
        let p_text = decode_entities(tag_re().replace_all(p.as_str(), "").trim());
        if p_text.len() < 40 {
            continue;
        }
        if boilerplate_re().is_match(&p_text) {
            continue;
        }
        cleaned.push(p_text);
    }
    if !cleaned.is_empty() {
        return cleaned.join("\n\n");
    }

    // Fallback: strip all tags and keep substantial lines.
    let raw = decode_entities(&tag_re().replace_all(&scope, " "));
    raw.lines()
        .map(str::trim)
        .filter(|l| l.len() > 40)
        .take(30)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn decode_entities(text: &str) -> String {
    let decoded = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&nbsp;", " ")
        .replace('\u{a0}', " ")
        .replace('\u{200b}', "");
    let mut out = String::with_capacity(decoded.len());
    let mut last_space = false;
    for ch in decoded.chars() {
        if ch == ' ' {
            if !last_space {
                out.push(' ');
            }
            last_space = true;
        } else {
            out.push(ch);
            last_space = false;
        }
    }
    out.trim().to_string()
}

// ============================================================================
// Extractive summarization
// ============================================================================

/// Summarize by selecting the most information-dense paragraphs.
///
/// News articles follow the inverted pyramid, so early paragraphs carry a
/// position bonus; named entities, numbers, and quotes add density score.
pub fn extractive_summary(article_text: &str, target_chars: usize) -> String {
    if article_text.is_empty() {
        return String::new();
    }
    let paragraphs: Vec<&str> = article_text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paragraphs.is_empty() {
        return String::new();
    }

    let mut scored: Vec<(f64, usize, &str)> = paragraphs
        .iter()
        .enumerate()
        .filter(|(_, p)| p.len() >= 30)
        .map(|(i, p)| (paragraph_score(p, i, paragraphs.len()), i, *p))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let mut selected: Vec<(usize, &str)> = Vec::new();
    let mut total = 0usize;
    for (_, idx, para) in scored {
        if total + para.len() > target_chars * 12 / 10 && total >= target_chars * 6 / 10 {
            break;
        }
        selected.push((idx, para));
        total += para.len();
        if total >= target_chars {
            break;
        }
    }

    if selected.is_empty() {
        return truncate_to(paragraphs[0], target_chars);
    }

    // Reorder by original position for narrative flow.
    selected.sort_by_key(|(idx, _)| *idx);
    let result = selected
        .iter()
        .map(|(_, p)| *p)
        .collect::<Vec<_>>()
        .join(" ");
    truncate_at_sentence(&result, target_chars)
}

fn paragraph_score(para: &str, position: usize, total: usize) -> f64 {
    let mut score = 0.0;

    let position_weight = (1.0 - (position as f64 / total.max(1) as f64) * 0.7).max(0.1);
    score += position_weight * 3.0;

    if (50..300).contains(&para.len()) {
        score += 1.0;
    } else if para.len() >= 300 {
        score += 0.5;
    }

    let caps = entity_caps_re().find_iter(para).count() as f64;
    score += (caps * 0.3).min(2.0);

    let numbers = number_re().find_iter(para).count() as f64;
    score += (numbers * 0.3).min(1.5);

    if para.contains('"') || para.contains('\u{201c}') {
        score += 1.0;
    }

    if boilerplate_re().is_match(para) {
        score -= 5.0;
    }

    score
}

fn truncate_to(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect()
}

fn truncate_at_sentence(text: &str, target_chars: usize) -> String {
    if text.len() <= target_chars {
        return text.to_string();
    }
    let head = truncate_to(text, target_chars);
    match head.rfind(". ") {
        Some(cut) if cut > target_chars / 2 => head[..cut + 1].to_string(),
        _ => {
            let short = truncate_to(text, target_chars.saturating_sub(3));
            format!("{short}...")
        }
    }
}

// ============================================================================
// The enricher
// ============================================================================

struct CachedSummary {
    summary: String,
    inserted: Instant,
}

pub struct ArticleEnricher {
    client: reqwest::Client,
    cfg: EnrichmentConfig,
    anthropic_key: String,
    anthropic_model: String,
    anthropic_base_url: String,
    gemini_key: String,
    cache: Mutex<LruCache<String, CachedSummary>>,
    domain_last_access: Mutex<LruCache<String, Instant>>,
}

impl ArticleEnricher {
    pub fn new(cfg: EnrichmentConfig, council: &ExpertCouncilConfig, keys: &ApiKeys) -> Self {
        if !keys.gemini_api_key.is_empty() {
            tracing::info!(model = %cfg.gemini_model, "Article enrichment: using Gemini");
        } else if !keys.anthropic_api_key.is_empty() {
            tracing::info!(model = %council.llm_model, "Article enrichment: using Anthropic");
        } else {
            tracing::info!("Article enrichment: using extractive (no LLM key)");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.fetch_timeout_secs.max(1)))
            .user_agent("Mozilla/5.0 (compatible; Briefwire/1.0)")
            .build()
            .unwrap_or_default();

        let cache_cap = NonZeroUsize::new(cfg.cache_max_entries.max(1)).unwrap_or(NonZeroUsize::MIN);
        let domain_cap = NonZeroUsize::new(DOMAIN_TABLE_CAP).unwrap_or(NonZeroUsize::MIN);

        Self {
            client,
            anthropic_key: keys.anthropic_api_key.clone(),
            anthropic_model: council.llm_model.clone(),
            anthropic_base_url: council.llm_base_url.clone(),
            gemini_key: keys.gemini_api_key.clone(),
            cache: Mutex::new(LruCache::new(cache_cap)),
            domain_last_access: Mutex::new(LruCache::new(domain_cap)),
            cfg,
        }
    }

    /// Fetch articles and replace feed teasers with real summaries.
    ///
    /// Fetches run in a bounded worker pool. The candidate's summary is only
    /// replaced when the produced summary is strictly longer; any failure
    /// leaves the original intact.
    pub async fn enrich(&self, mut candidates: Vec<CandidateItem>) -> Vec<CandidateItem> {
        if candidates.is_empty() {
            return candidates;
        }

        let jobs: Vec<(usize, String, String, String)> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| !c.url.is_empty())
            .map(|(i, c)| (i, c.url.clone(), c.title.clone(), c.source.clone()))
            .collect();

        let results: Vec<(usize, String)> = stream::iter(jobs)
            .map(|(i, url, title, source)| async move {
                (i, self.summarize_url(&url, &title, &source).await)
            })
            .buffer_unordered(self.cfg.max_workers.max(1))
            .collect()
            .await;

        let mut enriched = 0usize;
        for (i, summary) in results {
            if !summary.is_empty()
                && summary.chars().count() > candidates[i].summary.chars().count()
            {
                candidates[i].summary = summary;
                enriched += 1;
            }
        }

        tracing::info!(enriched, total = candidates.len(), "Article enrichment complete");
        candidates
    }

    async fn summarize_url(&self, url: &str, title: &str, source: &str) -> String {
        if let Some(cached) = self.cache_get(url) {
            return cached;
        }

        if !is_fetchable_url(url) {
            tracing::debug!(url = %truncate_to(url, 80), "Fetch blocked by SSRF gate");
            return String::new();
        }

        self.throttle_host(url).await;

        let html = self.fetch_article(url).await;
        if html.is_empty() {
            return String::new();
        }

        let article_text = extract_article_text(&html);
        if article_text.len() < MIN_ARTICLE_CHARS {
            return String::new();
        }

        let summary = self.summarize(&article_text, title, source).await;
        if !summary.is_empty() {
            self.cache_put(url, &summary);
        }
        summary
    }

    fn cache_get(&self, url: &str) -> Option<String> {
        let mut cache = lock_cache(&self.cache);
        let ttl = Duration::from_secs(self.cfg.cache_ttl_secs);
        match cache.get(url) {
            Some(entry) if entry.inserted.elapsed() < ttl => Some(entry.summary.clone()),
            Some(_) => {
                cache.pop(url);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, url: &str, summary: &str) {
        lock_cache(&self.cache).put(
            url.to_string(),
            CachedSummary {
                summary: summary.to_string(),
                inserted: Instant::now(),
            },
        );
    }

    /// Enforce the per-host minimum interval, sleeping when needed.
    async fn throttle_host(&self, url: &str) {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_string))
        else {
            return;
        };
        let wait = {
            let mut table = lock_domains(&self.domain_last_access);
            let now = Instant::now();
            let wait = match table.get(&host) {
                Some(last) => DOMAIN_MIN_INTERVAL.saturating_sub(now.duration_since(*last)),
                None => Duration::ZERO,
            };
            table.put(host, now + wait);
            wait
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    async fn fetch_article(&self, url: &str) -> String {
        let response = match self
            .client
            .get(url)
            .header("Accept", "text/html")
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(url = %truncate_to(url, 80), error = %e, "Article fetch failed");
                return String::new();
            }
        };

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        if !content_type.contains("html") && !content_type.contains("text") {
            return String::new();
        }

        match response.bytes().await {
            Ok(raw) => match String::from_utf8(raw.to_vec()) {
                Ok(s) => s,
                // Latin-1 fallback: every byte maps directly to a code point.
                Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
            },
            Err(e) => {
                tracing::debug!(url = %truncate_to(url, 80), error = %e, "Article body read failed");
                String::new()
            }
        }
    }

    async fn summarize(&self, article_text: &str, title: &str, source: &str) -> String {
        if !self.gemini_key.is_empty() {
            if let Some(summary) = self.gemini_summary(article_text, title, source).await {
                return summary;
            }
        }
        if !self.anthropic_key.is_empty() {
            if let Some(summary) = self.anthropic_summary(article_text, title, source).await {
                return summary;
            }
        }
        extractive_summary(article_text, self.cfg.target_summary_chars)
    }

    async fn anthropic_summary(
        &self,
        article_text: &str,
        title: &str,
        source: &str,
    ) -> Option<String> {
        let target = self.cfg.target_summary_chars;
        let article: String = article_text.chars().take(4000).collect();
        let system = format!(
            "You are a news summarizer for a personal intelligence briefing. \
             Write a concise but complete summary of the article so the reader \
             does NOT need to click through. Include key facts, names, numbers, \
             and quotes. Plain prose, no bullet points. Target length: {target} characters."
        );
        let user = format!(
            "Article: \"{title}\" from {source}\n\n{article}\n\nSummarize this article in about {target} characters."
        );
        let body = serde_json::json!({
            "model": self.anthropic_model,
            "max_tokens": 300,
            "system": system,
            "messages": [{"role": "user", "content": user}],
        });

        let result = self
            .client
            .post(format!("{}/messages", self.anthropic_base_url))
            .header("x-api-key", &self.anthropic_key)
            .header("anthropic-version", "2023-06-01")
            .timeout(Duration::from_secs(20))
            .json(&body)
            .send()
            .await;

        let value: serde_json::Value = match result {
            Ok(r) => r.json().await.ok()?,
            Err(e) => {
                tracing::warn!(title = %truncate_to(title, 60), error = %e, "Anthropic summary failed");
                return None;
            }
        };
        let text = value["content"][0]["text"].as_str().unwrap_or("").trim();
        (text.len() > 50).then(|| text.to_string())
    }

    async fn gemini_summary(
        &self,
        article_text: &str,
        title: &str,
        source: &str,
    ) -> Option<String> {
        let target = self.cfg.target_summary_chars;
        let article: String = article_text.chars().take(4000).collect();
        let prompt = format!(
            "You are a news summarizer for a personal intelligence briefing. \
             Summarize this article in about {target} characters so the reader \
             does NOT need the original. Include key facts, names, numbers, and \
             quotes. Plain prose, no bullet points.\n\n\
             Article: \"{title}\" from {source}\n\n{article}"
        );
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {"maxOutputTokens": 400, "temperature": 0.3},
        });

        // API key goes in a header, not the URL — URLs leak into logs and proxies.
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
            self.cfg.gemini_model
        );
        let result = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.gemini_key)
            .timeout(Duration::from_secs(20))
            .json(&body)
            .send()
            .await;

        let value: serde_json::Value = match result {
            Ok(r) => r.json().await.ok()?,
            Err(e) => {
                tracing::warn!(title = %truncate_to(title, 60), error = %e, "Gemini summary failed");
                return None;
            }
        };
        let text = value["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .trim();
        (text.len() > 50).then(|| text.to_string())
    }
}

fn lock_cache(
    m: &Mutex<LruCache<String, CachedSummary>>,
) -> std::sync::MutexGuard<'_, LruCache<String, CachedSummary>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn lock_domains(
    m: &Mutex<LruCache<String, Instant>>,
) -> std::sync::MutexGuard<'_, LruCache<String, Instant>> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssrf_gate_blocks_dangerous_urls() {
        assert!(!is_fetchable_url("file:///etc/passwd"));
        assert!(!is_fetchable_url("ftp://archive.example.org/file"));
        assert!(!is_fetchable_url("http://localhost/admin"));
        assert!(!is_fetchable_url("http://127.0.0.1:8080/"));
        assert!(!is_fetchable_url("http://10.0.0.5/internal"));
        assert!(!is_fetchable_url("http://172.16.3.2/"));
        assert!(!is_fetchable_url("http://192.168.1.1/router"));
        assert!(!is_fetchable_url("http://169.254.169.254/latest/meta-data/"));
        assert!(!is_fetchable_url("http://100.64.1.1/"));
        assert!(!is_fetchable_url("http://[::1]/"));
        assert!(!is_fetchable_url("http://[fe80::1]/"));
        assert!(!is_fetchable_url("http://[fd00::1]/"));
        assert!(!is_fetchable_url("not a url"));
    }

    #[test]
    fn ssrf_gate_allows_public_hosts() {
        assert!(is_fetchable_url("https://www.reuters.com/world/story"));
        assert!(is_fetchable_url("http://news.example.org/a"));
        assert!(is_fetchable_url("https://8.8.8.8/"));
    }

    #[test]
    fn extracts_paragraphs_and_drops_boilerplate() {
        let html = r#"
            <html><head><script>var x = 1;</script><style>p{}</style></head>
            <body><nav><p>Home | News | Sport navigation menu links</p></nav>
            <article>
            <p>The central bank held its benchmark rate steady on Wednesday, citing persistent inflation pressures across the services sector.</p>
            <p>Subscribe to our newsletter for more updates delivered to you.</p>
            <p>Governor Ellis told reporters that "the committee needs more evidence" before considering cuts in 2026.</p>
            </article></body></html>"#;
        let text = extract_article_text(html);
        assert!(text.contains("benchmark rate"));
        assert!(text.contains("Governor Ellis"));
        assert!(!text.contains("Subscribe"));
        assert!(!text.contains("navigation menu"));
        assert!(!text.contains("var x"));
    }

    #[test]
    fn extraction_falls_back_without_paragraph_tags() {
        let html = "<div>A fairly long line of article body text that should survive the fallback extraction path.</div>";
        let text = extract_article_text(html);
        assert!(text.contains("fallback extraction path"));
    }

    #[test]
    fn extractive_summary_prefers_dense_early_paragraphs() {
        let article = concat!(
            "President Marlow signed the $40 billion infrastructure package on Tuesday, a move officials called decisive.\n\n",
            "Click here to read more stories like this.\n\n",
            "The bill allocates funds across 12 states, with Ohio and Georgia receiving the largest shares according to Treasury data.\n\n",
            "Filler paragraph with nothing specific in it at all, really nothing.",
        );
        let summary = extractive_summary(article, 220);
        assert!(summary.contains("Marlow"));
        assert!(!summary.contains("Click here"));
        assert!(summary.len() <= 300);
    }

    #[test]
    fn extractive_summary_empty_input() {
        assert_eq!(extractive_summary("", 500), "");
    }

    #[tokio::test]
    async fn enrich_skips_candidates_without_urls() {
        let enricher = ArticleEnricher::new(
            EnrichmentConfig::default(),
            &ExpertCouncilConfig::default(),
            &ApiKeys::default(),
        );
        let c = CandidateItem {
            candidate_id: "c1".to_string(),
            title: "T".to_string(),
            source: "reuters".to_string(),
            summary: "original".to_string(),
            url: String::new(),
            topic: "markets".to_string(),
            evidence_score: 0.5,
            novelty_score: 0.5,
            preference_fit: 0.5,
            prediction_signal: 0.5,
            discovered_by: "a".to_string(),
            created_at: chrono::Utc::now(),
            lifecycle: crate::types::StoryLifecycle::Developing,
            urgency: crate::types::UrgencyLevel::Routine,
            regions: Vec::new(),
            corroborated_by: Vec::new(),
            contrarian_signal: String::new(),
        };
        let out = enricher.enrich(vec![c]).await;
        assert_eq!(out[0].summary, "original");
    }

    #[test]
    fn cache_roundtrip_with_ttl() {
        let enricher = ArticleEnricher::new(
            EnrichmentConfig::default(),
            &ExpertCouncilConfig::default(),
            &ApiKeys::default(),
        );
        enricher.cache_put("https://a.test/x", "cached summary");
        assert_eq!(
            enricher.cache_get("https://a.test/x"),
            Some("cached summary".to_string())
        );
        assert_eq!(enricher.cache_get("https://a.test/other"), None);
    }
}
