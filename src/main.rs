#[macro_use]
extern crate html5ever;
#[macro_use]
extern crate lazy_static;

mod parse;
mod session_client;

use parse::{ListingParser, LoginFormParser};
use session_client::SessionClient;
use structopt::StructOpt;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::io::Write;
use std::path::{Path, PathBuf};
use easy_error::{ResultExt, Error, err_msg};

// These URLs work as of August 2019.
const LOGIN_URL: &str = "https://jsfiddle.net/user/login/";
const USER_LIST_URL: &str = "https://jsfiddle.net/user/fiddles/all/";

// A rejected login comes back as the login form again; this phrase in the
// response body is the tell.
const LOGIN_REJECTED_MARKER: &str = "enter a correct login and password";

/// Download all your fiddles from JSFiddle.net.
#[derive(StructOpt)]
struct Args {
    /// User email address to log in to JSFiddle.net
    #[structopt(short, long, value_name = "email")]
    user: Option<String>,
    /// Password to log into JSFiddle.net
    #[structopt(short, long, value_name = "password")]
    password: Option<String>,
    /// Destination folder to save fiddles to
    #[structopt(short, long, value_name = "destination", default_value = "fiddles")]
    dest: PathBuf,
    /// Skip fixing the script URL when fiddles are downloaded
    #[structopt(short, long)]
    nofixurl: bool,
    /// Only list fiddles, do not download them
    #[structopt(short, long)]
    list: bool,
}

fn main() -> Result<(), Error> {
    interpret_args()
}

fn interpret_args() -> Result<(), Error> {
    let args = Args::from_args();

    let user = match args.user {
        Some(user) => user,
        None => prompt_user_email()?,
    };
    let password = match args.password {
        Some(password) => password,
        None => rpassword::prompt_password("Password: ").context("Could not read password")?,
    };

    if !args.dest.exists() {
        println!("Creating destination folder...");
        fs::create_dir(&args.dest)
            .context(format!("Could not create destination folder {:?}", args.dest))?;
    }

    let session = SessionClient::new()?;
    log_in(&session, &user, &password)?;
    let listing = fetch_listing(&session)?;

    if args.list {
        list_fiddles(&listing);
        Ok(())
    } else {
        download_fiddles(&session, &listing, &args.dest, !args.nofixurl)
    }
}

fn prompt_user_email() -> Result<String, Error> {
    print!("JSFiddle user email address:");
    io::stdout().flush().context("Could not flush stdout")?;
    let reader = io::stdin();
    let mut buf = String::new();
    reader.read_line(&mut buf).context("Could not read line")?;

    Ok(buf.trim().to_string())
}

/// Fetches the login page for its hidden form fields, folds the
/// credentials in, and posts the lot back. A response still carrying the
/// rejection phrase means the credentials were bad.
fn log_in(session: &SessionClient, user: &str, password: &str) -> Result<(), Error> {
    println!("Logging in...");
    let login_page = session.get_text(LOGIN_URL)?;

    let mut form = LoginFormParser::default();
    form.feed(&login_page);
    let mut fields = form.fields();
    fields.insert("email".to_string(), user.to_string());
    fields.insert("password".to_string(), password.to_string());

    let response = session.post_form(LOGIN_URL, &fields)?;
    if response.contains(LOGIN_REJECTED_MARKER) {
        return Err(err_msg("Login failed."));
    }
    Ok(())
}

/// Fetches the first listing page, then whatever pages its pagination
/// links point at, feeding every response into the same parser until no
/// unfetched page remains. Pages discovered on later pages are picked up
/// too, each exactly once.
fn fetch_listing(session: &SessionClient) -> Result<ListingParser, Error> {
    println!("Get Fiddle list...");
    let mut listing = ListingParser::default();
    listing.feed(&session.get_text(USER_LIST_URL)?);

    let mut fetched = BTreeSet::new();
    loop {
        let pending: Vec<String> = listing
            .next_pages()
            .iter()
            .filter(|page| !fetched.contains(page.as_str()))
            .cloned()
            .collect();
        if pending.is_empty() {
            break;
        }
        for page in pending {
            listing.feed(&session.get_text(&format!("{USER_LIST_URL}{page}"))?);
            fetched.insert(page);
        }
    }
    Ok(listing)
}

fn list_fiddles(listing: &ListingParser) {
    match listing.owner() {
        Some(owner) => println!("Fiddles for {}:", owner),
        None => println!("No fiddles found."),
    }
    for (id, title) in listing.fiddles() {
        println!(" [{}] {}...", id, title);
    }
}

/// Downloads every fiddle in the listing into `dest`, one HTML file per
/// fiddle, named after its sanitized title.
fn download_fiddles(
    session: &SessionClient,
    listing: &ListingParser,
    dest: &Path,
    fix_urls: bool,
) -> Result<(), Error> {
    // A populated listing always carries the owner; both come from the
    // same anchors.
    if let Some(owner) = listing.owner() {
        for (id, title) in listing.fiddles() {
            println!("Downloading fiddle [{}] {}...", id, title);
            let body = session.get_text(&fiddle_url(owner, id))?;
            let body = if fix_urls { fix_script_url(body) } else { body };
            let file = dest.join(format!("{}.html", sanitize_title(title)));
            fs::write(&file, body).context(format!("Could not write {file:?}"))?;
        }
    }
    println!("...Done.");
    Ok(())
}

/// The standalone "light" rendering of one fiddle; this is what gets
/// saved.
fn fiddle_url(owner: &str, id: &str) -> String {
    format!("https://fiddle.jshell.net/{owner}/{id}/show/light/")
}

// Script libraries a fiddle pulls in are referenced scheme-relative
// (src="//host/path"), which resolves nowhere once the file is opened
// locally. Match the one empty script tag carrying such a src so the
// scheme can be restored.
lazy_static! {
    static ref BARE_SCRIPT_SRC_REGEX: Regex =
        Regex::new(r#"(?s)<script.*?src="(//\w+[\w/.-]*)"\s*>\s*</script>"#).unwrap();
}

/// Restores the stripped "https:" on the first scheme-relative script
/// reference in a downloaded fiddle. Pages without one pass through
/// untouched.
fn fix_script_url(source: String) -> String {
    let bare = BARE_SCRIPT_SRC_REGEX
        .captures(&source)
        .map(|captures| captures.get(1).unwrap().as_str().to_string());
    match bare {
        Some(bare) => {
            let fixed = format!("https:{bare}");
            source.replacen(&bare, &fixed, 1)
        }
        None => source,
    }
}

/// Characters kept in filenames besides alphanumerics.
const KEEP_CHARACTERS: [char; 3] = [' ', '.', '_'];

/// Cleans possibly problematic gunk out of a title so it can name a file.
fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || KEEP_CHARACTERS.contains(c))
        .collect::<String>()
        .trim_end()
        .to_string()
}

#[test]
fn test_fiddle_url_template() {
    assert_eq!(
        "https://fiddle.jshell.net/alice/abcd12/show/light/",
        fiddle_url("alice", "abcd12")
    );
}

#[test]
fn test_fix_script_url_restores_scheme() {
    let page = concat!(
        r#"<html><head><script type="text/javascript" "#,
        r#"src="//cdnjs.cloudflare.com/ajax/libs/d3/3.4.11/d3.min.js"></script>"#,
        "</head><body></body></html>"
    )
    .to_string();
    let fixed = fix_script_url(page);
    assert!(fixed.contains(r#"src="https://cdnjs.cloudflare.com/ajax/libs/d3/3.4.11/d3.min.js""#));
    // A second pass finds no scheme-relative reference left and changes
    // nothing.
    assert_eq!(fixed.clone(), fix_script_url(fixed));
}

#[test]
fn test_fix_script_url_tolerates_internal_whitespace() {
    let page = "<script src=\"//cdn.example.com/lib.js\" >\n</script>".to_string();
    assert_eq!(
        "<script src=\"https://cdn.example.com/lib.js\" >\n</script>",
        fix_script_url(page)
    );
}

#[test]
fn test_fix_script_url_requires_empty_body() {
    let page = r#"<script src="//cdn.example.com/lib.js">var x = 1;</script>"#.to_string();
    assert_eq!(page.clone(), fix_script_url(page));
}

#[test]
fn test_fix_script_url_leaves_other_pages_alone() {
    let page = r#"<script src="https://cdn.example.com/lib.js"></script>"#.to_string();
    assert_eq!(page.clone(), fix_script_url(page));
}

#[test]
fn test_sanitize_title_strips_punctuation() {
    assert_eq!("MyDemo1", sanitize_title("My:Demo*1"));
}

#[test]
fn test_sanitize_title_keeps_allowed_characters_and_trims() {
    assert_eq!("v1.2_final draft", sanitize_title("v1.2_final draft!  "));
}
