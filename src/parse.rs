use html5ever::tendril::StrTendril;
use html5ever::tokenizer::{
    BufferQueue, CharacterTokens, CommentToken, EOFToken, EndTag, StartTag, TagToken, Token,
    TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use html5ever::Attribute;
#[cfg(test)]
use markup5ever::{LocalName, QualName};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;

// The listing page marks neither kind of interesting link with a class or
// id, so the shape of the href is all there is to go on. Fiddle links look
// like "/owner/id/", optionally followed by numeric revision segments;
// links to further listing pages look like "/user/fiddles/all/2/".
lazy_static! {
    static ref FIDDLE_HREF_REGEX: Regex = Regex::new(r"^/(\w+)/(\w+)/(?:\d+/)*$").unwrap();
    static ref PAGE_HREF_REGEX: Regex = Regex::new(r"^/user/fiddles/all/(\d+)/").unwrap();
}

/// Path segments that sit where a fiddle ID would, but are really site
/// navigation.
const STRUCTURAL_IDS: [&str; 2] = ["groups", "logout"];

/// Streams `html` through the tokenizer into `sink` and hands the sink
/// back once the input is consumed.
fn run_tokenizer<S: TokenSink>(sink: S, html: &str) -> S {
    let mut input = BufferQueue::new();
    input.push_back(StrTendril::from(html));
    let mut tokenizer = Tokenizer::new(sink, TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink
}

/// Digs the name/value pair out of one input tag's attribute list,
/// regardless of where the two attributes sit in it. An input without a
/// value yields an empty value; one without even a name yields an empty
/// pair, which callers are expected to drop.
fn input_entry(attrs: &[Attribute]) -> (String, String) {
    let name = attrs.iter().find(|attr| attr.name.local == local_name!("name"));
    let value = attrs.iter().find(|attr| attr.name.local == local_name!("value"));
    match (name, value) {
        (Some(name), Some(value)) => (name.value.to_string(), value.value.to_string()),
        (Some(name), None) => (name.value.to_string(), String::new()),
        _ => (String::new(), String::new()),
    }
}

/// Collects the attribute lists of every `input` element on the login
/// page. The ones that matter are the hidden session/CSRF tokens the site
/// expects to be posted back alongside the credentials.
#[derive(Default)]
pub struct LoginFormParser {
    inputs: Vec<Vec<Attribute>>,
}

impl TokenSink for LoginFormParser {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        if let TagToken(tag) = token {
            if tag.kind == StartTag && tag.name == local_name!("input") {
                self.inputs.push(tag.attrs);
            }
        }
        TokenSinkResult::Continue
    }
}

impl LoginFormParser {
    pub fn feed(&mut self, html: &str) {
        *self = run_tokenizer(mem::take(self), html);
    }

    /// Reduces the collected inputs to a field-name/value map, dropping
    /// inputs that never carried a name.
    pub fn fields(&self) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        for attrs in &self.inputs {
            let (name, value) = input_entry(attrs);
            if !name.is_empty() {
                fields.insert(name, value);
            }
        }
        fields
    }
}

/// Where the parser stands with respect to a fiddle link's text.
enum TitleCapture {
    /// Not inside a fiddle link.
    Idle,
    /// Saw a fiddle link's start tag; its text has not begun yet.
    Armed { id: String },
    /// Accumulating the link text for `id`. The tokenizer hands a text run
    /// over in pieces (decoded character references arrive on their own),
    /// so the title is everything gathered until the run ends.
    Collecting { id: String, title: String },
}

impl Default for TitleCapture {
    fn default() -> Self {
        TitleCapture::Idle
    }
}

/// Walks listing pages and accumulates fiddle IDs with their display
/// titles, the page indices from pagination links, and the account name
/// owning the fiddles. One instance can be fed any number of pages; the
/// collected entries and page indices only ever grow.
#[derive(Default)]
pub struct ListingParser {
    fiddles: BTreeMap<String, String>,
    next_pages: BTreeSet<String>,
    owner: Option<String>,
    capture: TitleCapture,
}

impl TokenSink for ListingParser {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            TagToken(tag) => {
                self.flush_title();
                if tag.name == local_name!("a") {
                    match tag.kind {
                        StartTag => self.inspect_anchor(&tag.attrs),
                        EndTag => self.capture = TitleCapture::Idle,
                    }
                }
            }
            CharacterTokens(text) => self.push_text(&text),
            CommentToken(_) | EOFToken => self.flush_title(),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

impl ListingParser {
    pub fn feed(&mut self, html: &str) {
        *self = run_tokenizer(mem::take(self), html);
    }

    /// Fiddle IDs with their display titles, across every page fed so far.
    pub fn fiddles(&self) -> &BTreeMap<String, String> {
        &self.fiddles
    }

    /// Indices of further listing pages seen in pagination links.
    pub fn next_pages(&self) -> &BTreeSet<String> {
        &self.next_pages
    }

    /// Account name the fiddles belong to, from the first fiddle link seen.
    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }

    fn inspect_anchor(&mut self, attrs: &[Attribute]) {
        if let Some((owner, id)) = fiddle_link(attrs) {
            if self.owner.is_none() {
                self.owner = Some(owner);
            }
            self.capture = TitleCapture::Armed { id };
        } else if let Some(page) = pagination_link(attrs) {
            self.next_pages.insert(page);
        }
    }

    fn push_text(&mut self, text: &str) {
        self.capture = match mem::take(&mut self.capture) {
            TitleCapture::Idle => TitleCapture::Idle,
            TitleCapture::Armed { id } => TitleCapture::Collecting {
                id,
                title: text.to_string(),
            },
            TitleCapture::Collecting { id, mut title } => {
                title.push_str(text);
                TitleCapture::Collecting { id, title }
            }
        };
    }

    /// Completes a pending title once its text run ends. An armed capture
    /// that has seen no text yet stays armed; markup other than the anchor
    /// itself does not disturb it.
    fn flush_title(&mut self) {
        match mem::take(&mut self.capture) {
            TitleCapture::Collecting { id, title } => {
                self.fiddles.insert(id, title);
            }
            other => self.capture = other,
        }
    }
}

/// Returns the owner and fiddle ID when the attributes are exactly one
/// `href` shaped like a fiddle link and the ID is not a navigation one.
fn fiddle_link(attrs: &[Attribute]) -> Option<(String, String)> {
    let captures = FIDDLE_HREF_REGEX.captures(lone_href(attrs)?)?;
    let id = captures[2].to_string();
    if STRUCTURAL_IDS.contains(&id.as_str()) {
        return None;
    }
    Some((captures[1].to_string(), id))
}

/// Returns the page index when the attributes are exactly one `href`
/// pointing at another page of the listing.
fn pagination_link(attrs: &[Attribute]) -> Option<String> {
    let captures = PAGE_HREF_REGEX.captures(lone_href(attrs)?)?;
    Some(captures[1].to_string())
}

/// The listing heuristic only trusts anchors whose sole attribute is the
/// href itself; anything more decorated is site chrome.
fn lone_href(attrs: &[Attribute]) -> Option<&str> {
    match attrs {
        [attr] if attr.name.local == local_name!("href") => Some(&attr.value),
        _ => None,
    }
}

#[cfg(test)]
fn attr(name: &str, value: &str) -> Attribute {
    Attribute {
        name: QualName::new(None, ns!(), LocalName::from(name)),
        value: StrTendril::from(value),
    }
}

#[test]
fn test_input_entry_pairs_name_with_value() {
    assert_eq!(
        ("csrf".to_string(), "abc123".to_string()),
        input_entry(&[attr("value", "abc123"), attr("type", "hidden"), attr("name", "csrf")])
    );
}

#[test]
fn test_input_entry_name_only() {
    assert_eq!(
        ("email".to_string(), String::new()),
        input_entry(&[attr("type", "text"), attr("name", "email")])
    );
}

#[test]
fn test_input_entry_degenerate_lists_are_empty() {
    assert_eq!((String::new(), String::new()), input_entry(&[]));
    assert_eq!(
        (String::new(), String::new()),
        input_entry(&[attr("value", "orphan")])
    );
    assert_eq!(
        (String::new(), String::new()),
        input_entry(&[attr("type", "submit")])
    );
}

#[test]
fn test_login_form_reads_name_value_pair() {
    let mut parser = LoginFormParser::default();
    parser.feed(r#"<input name="csrf" value="abc123">"#);
    assert_eq!(
        HashMap::from([("csrf".to_string(), "abc123".to_string())]),
        parser.fields()
    );
}

#[test]
fn test_login_form_collects_hidden_fields() {
    let page = r#"
        <form action="/user/login/" method="post">
            <input type="hidden" name="csrfmiddlewaretoken" value="abc123">
            <input type="text" name="email">
            <input type="password" name="password">
            <input type="submit" value="Log in">
        </form>"#;
    let mut parser = LoginFormParser::default();
    parser.feed(page);
    let fields = parser.fields();
    assert_eq!(3, fields.len());
    assert_eq!(Some(&"abc123".to_string()), fields.get("csrfmiddlewaretoken"));
    assert_eq!(Some(&String::new()), fields.get("email"));
    assert_eq!(Some(&String::new()), fields.get("password"));
}

#[test]
fn test_listing_records_fiddle_and_owner() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">My Demo</a>"#);
    assert_eq!(Some("alice"), parser.owner());
    assert_eq!(Some(&"My Demo".to_string()), parser.fiddles().get("abcd12"));
}

#[test]
fn test_listing_skips_navigation_ids() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/groups/">Groups</a><a href="/user/logout/">Log out</a>"#);
    assert!(parser.fiddles().is_empty());
    assert_eq!(None, parser.owner());
}

#[test]
fn test_listing_ignores_decorated_anchors() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/" class="button">Styled</a>"#);
    assert!(parser.fiddles().is_empty());
}

#[test]
fn test_listing_accepts_revision_links() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/3/">Third revision</a>"#);
    assert_eq!(Some(&"Third revision".to_string()), parser.fiddles().get("abcd12"));
}

#[test]
fn test_listing_collects_pagination() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/user/fiddles/all/2/">2</a>"#);
    assert!(parser.fiddles().is_empty());
    assert_eq!(1, parser.next_pages().len());
    assert!(parser.next_pages().contains("2"));
}

#[test]
fn test_listing_title_spans_entity_chunks() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">Drag &amp; drop</a>"#);
    assert_eq!(Some(&"Drag & drop".to_string()), parser.fiddles().get("abcd12"));
}

#[test]
fn test_listing_title_stops_at_nested_markup() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">Lead<span>trailer</span></a>"#);
    assert_eq!(Some(&"Lead".to_string()), parser.fiddles().get("abcd12"));
}

#[test]
fn test_listing_title_stops_at_comment() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">Lead<!-- chrome -->tail</a>"#);
    assert_eq!(Some(&"Lead".to_string()), parser.fiddles().get("abcd12"));
}

#[test]
fn test_listing_title_completes_at_input_end() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">Trailing title"#);
    assert_eq!(
        Some(&"Trailing title".to_string()),
        parser.fiddles().get("abcd12")
    );
}

#[test]
fn test_listing_armed_capture_survives_decorated_anchor() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/"><a href="/x" class="nav">Styled title</a>"#);
    assert_eq!(1, parser.fiddles().len());
    assert_eq!(
        Some(&"Styled title".to_string()),
        parser.fiddles().get("abcd12")
    );
}

#[test]
fn test_listing_drops_anchor_without_text() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/"></a><p>after</p>"#);
    assert!(parser.fiddles().is_empty());
}

#[test]
fn test_listing_accumulates_across_pages() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/one1/">First</a><a href="/user/fiddles/all/2/">2</a>"#);
    parser.feed(r#"<a href="/alice/two2/">Second</a><a href="/user/fiddles/all/3/">3</a>"#);
    assert_eq!(2, parser.fiddles().len());
    assert_eq!(Some(&"First".to_string()), parser.fiddles().get("one1"));
    assert_eq!(Some(&"Second".to_string()), parser.fiddles().get("two2"));
    assert!(parser.next_pages().contains("2"));
    assert!(parser.next_pages().contains("3"));
}

#[test]
fn test_listing_later_page_overwrites_duplicate_id() {
    let mut parser = ListingParser::default();
    parser.feed(r#"<a href="/alice/abcd12/">Old title</a>"#);
    parser.feed(r#"<a href="/alice/abcd12/">New title</a>"#);
    assert_eq!(Some(&"New title".to_string()), parser.fiddles().get("abcd12"));
}
