use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;
use wp_wxr_importer::entities::Entity;
use wp_wxr_importer::reader::WxrReader;
use wp_xml_api::XmlProcessorError;

/// Streams a WXR export from disk and prints what it contains.
///
/// Exit codes: 0 on success, 1 for a malformed document, 2 when the
/// document uses unsupported XML features, 3 for I/O problems.
fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let Some(path) = std::env::args().nth(1) else {
        eprintln!("usage: wp-wxr-importer <export.xml>");
        return ExitCode::from(3);
    };

    let mut file = match File::open(&path) {
        Ok(file) => file,
        Err(error) => {
            eprintln!("{path}: {error}");
            return ExitCode::from(3);
        }
    };

    let mut reader = WxrReader::for_streaming(Vec::new());
    let mut buffer = [0u8; 8192];
    let mut counts: BTreeMap<&'static str, u64> = BTreeMap::new();
    let mut done_reading = false;

    loop {
        if reader.next_entity() {
            let kind = match reader.get_entity() {
                Some(Entity::SiteOption(_)) => "site options",
                Some(Entity::Author(_)) => "authors",
                Some(Entity::Category(_)) => "categories",
                Some(Entity::Tag(_)) => "tags",
                Some(Entity::Term(_)) => "terms",
                Some(Entity::Post(_)) => "posts",
                Some(Entity::PostMeta(_)) => "postmeta",
                Some(Entity::Comment(_)) => "comments",
                Some(Entity::CommentMeta(_)) => "commentmeta",
                Some(Entity::TermMeta(_)) => "termmeta",
                None => continue,
            };
            *counts.entry(kind).or_default() += 1;
            continue;
        }

        if reader.get_last_error().is_some() || done_reading {
            break;
        }

        match file.read(&mut buffer) {
            Ok(0) => {
                reader.input_finished();
                done_reading = true;
            }
            Ok(bytes_read) => {
                reader.append_bytes(&buffer[..bytes_read]);
            }
            Err(error) => {
                eprintln!("{path}: {error}");
                return ExitCode::from(3);
            }
        }
    }

    if let Some(error) = reader.get_last_error() {
        eprintln!("{error}");
        if let Some(xml_error) = reader.get_underlying_xml_error() {
            tracing::debug!(%xml_error, "parse failed");
            if matches!(xml_error, XmlProcessorError::Unsupported(_)) {
                return ExitCode::from(2);
            }
        }
        return ExitCode::from(1);
    }

    println!(
        "WXR {} document",
        reader.get_wxr_version().unwrap_or("unknown")
    );
    for (kind, count) in &counts {
        println!("{count:>8} {kind}");
    }

    ExitCode::SUCCESS
}
