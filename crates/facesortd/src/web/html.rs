//! Server-rendered pages.

use crate::categorizer::{CategorizeReport, PhotoOutcome, PhotoStatus};
use crate::organizer::{Collection, Registration};
use facesort_registry::Person;
use std::fmt::Write;

/// Outcomes shown on the result page of a categorize run.
const PREVIEW_OUTCOMES: usize = 5;
/// Thumbnails shown per collection on the index page.
const PREVIEW_THUMBNAILS: usize = 8;

const STYLE: &str = "body{font-family:sans-serif;max-width:60rem;margin:2rem auto;padding:0 1rem}\
section{margin-bottom:2rem}\
img.thumb{width:120px;height:120px;object-fit:cover;margin:2px;border:1px solid #ccc}\
.error{color:#b00}\
table{border-collapse:collapse}td,th{padding:.25rem .75rem;border-bottom:1px solid #eee;text-align:left}";

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

/// Percent-encode one URL path segment.
pub fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(byte as char),
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}

fn collection_url(folder: &str, file: &str) -> String {
    format!("/collections/{}/{}", encode_segment(folder), encode_segment(file))
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n<title>{title}</title>\n\
         <style>{STYLE}</style>\n</head>\n<body>\n<h1>{title}</h1>\n{body}\n</body>\n</html>\n",
        title = escape(title),
    )
}

fn back_link() -> &'static str {
    "<p><a href=\"/\">Back</a></p>"
}

pub fn index_page(persons: &[Person], runs: &[CategorizeReport], collections: &[Collection]) -> String {
    let mut body = String::new();

    body.push_str(
        "<section>\n<h2>Register a person</h2>\n\
         <form action=\"/register\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <p><label>Name <input type=\"text\" name=\"name\" required maxlength=\"64\"></label></p>\n\
         <p><label>Sample photos <input type=\"file\" name=\"samples\" accept=\"image/jpeg,image/png\" multiple required></label></p>\n\
         <p><button type=\"submit\">Register</button></p>\n</form>\n</section>\n",
    );

    body.push_str(
        "<section>\n<h2>Categorize photos</h2>\n\
         <form action=\"/categorize\" method=\"post\" enctype=\"multipart/form-data\">\n\
         <p><label>Photos <input type=\"file\" name=\"photos\" accept=\"image/jpeg,image/png\" multiple required></label></p>\n\
         <p><label>Assign to <select name=\"person\">\n<option value=\"auto\">Automatic (match faces)</option>\n\
         <option value=\"unknown\">Unknown (no matching)</option>\n",
    );
    for person in persons {
        let name = escape(&person.name);
        let _ = writeln!(body, "<option value=\"{name}\">{name}</option>");
    }
    body.push_str("</select></label></p>\n<p><button type=\"submit\">Categorize</button></p>\n</form>\n</section>\n");

    body.push_str("<section>\n<h2>Registered people</h2>\n");
    if persons.is_empty() {
        body.push_str("<p>Nobody is registered yet.</p>\n");
    } else {
        body.push_str("<table>\n<tr><th>Name</th><th>Samples</th><th>Registered</th></tr>\n");
        for person in persons {
            let _ = writeln!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&person.name),
                person.samples.len(),
                escape(&person.created_at)
            );
        }
        body.push_str("</table>\n");
    }
    body.push_str("</section>\n");

    if !runs.is_empty() {
        body.push_str("<section>\n<h2>Recent runs</h2>\n<table>\n\
                       <tr><th>Finished</th><th>Mode</th><th>Photos</th><th>Matched</th><th>Unmatched</th><th>No faces</th><th>Failed</th></tr>\n");
        for run in runs {
            let s = &run.summary;
            let _ = writeln!(
                body,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                run.finished_at.format("%Y-%m-%d %H:%M:%S"),
                escape(&run.mode),
                s.photos,
                s.matched,
                s.unmatched,
                s.no_faces,
                s.failed
            );
        }
        body.push_str("</table>\n</section>\n");
    }

    body.push_str("<section>\n<h2>Collections</h2>\n");
    if collections.is_empty() {
        body.push_str("<p>No photos have been categorized yet.</p>\n");
    }
    for collection in collections {
        let _ = writeln!(
            body,
            "<h3>{} ({} photos)</h3>\n<div>",
            escape(&collection.name),
            collection.photos.len()
        );
        for photo in collection.photos.iter().take(PREVIEW_THUMBNAILS) {
            let _ = writeln!(
                body,
                "<a href=\"{url}\"><img class=\"thumb\" src=\"{url}\" alt=\"{alt}\"></a>",
                url = collection_url(&collection.name, photo),
                alt = escape(photo)
            );
        }
        body.push_str("</div>\n");
    }
    body.push_str("</section>\n");

    layout("facesort", &body)
}

pub fn registration_page(registration: &Registration) -> String {
    let person = &registration.person;
    let mut body = format!(
        "<p>Added {} sample(s) for <strong>{}</strong>; {} sample(s) on file.</p>\n",
        registration.added,
        escape(&person.name),
        person.samples.len()
    );
    if !registration.skipped.is_empty() {
        body.push_str("<p>Skipped:</p>\n<ul>\n");
        for skipped in &registration.skipped {
            let _ = writeln!(
                body,
                "<li>{}: {}</li>",
                escape(&skipped.file_name),
                escape(&skipped.reason)
            );
        }
        body.push_str("</ul>\n");
    }
    body.push_str(back_link());
    layout("Registered", &body)
}

fn status_label(status: PhotoStatus) -> &'static str {
    match status {
        PhotoStatus::Matched => "matched",
        PhotoStatus::Unmatched => "no match",
        PhotoStatus::NoFaces => "no faces",
        PhotoStatus::Failed => "failed",
    }
}

fn outcome_row(body: &mut String, outcome: &PhotoOutcome) {
    let thumb = outcome
        .placements
        .first()
        .map(|p| {
            let url = collection_url(&p.folder, &p.file_name);
            format!("<a href=\"{url}\"><img class=\"thumb\" src=\"{url}\" alt=\"\"></a>")
        })
        .unwrap_or_default();
    let people = outcome
        .matches
        .iter()
        .map(|m| match m.similarity {
            Some(s) => format!("{} ({s:.2})", escape(&m.person)),
            None => escape(&m.person),
        })
        .collect::<Vec<_>>()
        .join(", ");
    let detail = match &outcome.error {
        Some(error) => format!("<span class=\"error\">{}</span>", escape(error)),
        None => people,
    };
    let _ = writeln!(
        body,
        "<tr><td>{thumb}</td><td>{}</td><td>{}</td><td>{}</td><td>{detail}</td></tr>",
        escape(&outcome.file_name),
        status_label(outcome.status),
        outcome.faces_detected
    );
}

pub fn report_page(report: &CategorizeReport) -> String {
    let s = &report.summary;
    let mut body = format!(
        "<p>Mode: {}. Processed {} photo(s): {} matched, {} without a match, {} without faces, {} failed.</p>\n",
        escape(&report.mode),
        s.photos,
        s.matched,
        s.unmatched,
        s.no_faces,
        s.failed
    );

    body.push_str("<table>\n<tr><th></th><th>Photo</th><th>Result</th><th>Faces</th><th>People</th></tr>\n");
    for outcome in report.outcomes.iter().take(PREVIEW_OUTCOMES) {
        outcome_row(&mut body, outcome);
    }
    body.push_str("</table>\n");
    if report.outcomes.len() > PREVIEW_OUTCOMES {
        let _ = writeln!(
            body,
            "<p>… and {} more.</p>",
            report.outcomes.len() - PREVIEW_OUTCOMES
        );
    }
    body.push_str(back_link());
    layout("Categorized", &body)
}

pub fn error_page(message: &str) -> String {
    let body = format!("<p class=\"error\">{}</p>\n{}", escape(message), back_link());
    layout("Something went wrong", &body)
}
