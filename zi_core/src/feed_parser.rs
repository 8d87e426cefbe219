//! XML feed parsing into a `RawFeed` (§4).
//!
//! One recursive `parse_element` walking quick-xml pull events, matching on
//! tag name at each level. Never a generic deserialize-whole-document
//! shortcut: per-element failures carry the offending tag name into
//! `Error::InvalidData` instead of a generic parse error.

use crate::errors::Error;
use crate::feed::{
    Binding, Command, Dependency, EnvironmentMode, Group, GroupAttrs, Importance, RawFeed,
    RawImplementation, RecipeStep, RetrievalMethod, Stability,
};
use crate::requirements::{Architecture, Cpu, Os};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

/// Parse a 0install feed document into its raw (pre-normalization) form.
pub fn parse_feed(xml: &[u8]) -> Result<RawFeed, Error> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text = true;

    let mut feed = RawFeed::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) if e.local_name().as_ref() == b"interface" => {
                feed.uri = attr(e, "uri").unwrap_or_default();
                parse_interface_body(&mut reader, &mut feed)?;
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    if feed.uri.is_empty() {
        // <uri> isn't present until the feed has been cached at least once;
        // callers must supply the fetch URL separately when normalizing.
    }
    Ok(feed)
}

fn parse_interface_body(reader: &mut Reader<&[u8]>, feed: &mut RawFeed) -> Result<(), Error> {
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) => {
                let name = local_name(e);
                match name.as_str() {
                    "name" => feed.name = Some(read_text(reader)?),
                    "feed" => {
                        if let Some(src) = attr(e, "src") {
                            feed.feed_references.push(src);
                        }
                        skip_to_end(reader, e)?;
                    }
                    "group" => {
                        let group = parse_group(reader, e)?;
                        feed.root.groups.push(group);
                    }
                    "implementation" => {
                        let impl_ = parse_implementation(reader, e, &GroupAttrs::default())?;
                        feed.root.implementations.push(impl_);
                    }
                    _ => skip_to_end(reader, e)?,
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"interface" => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document inside <interface>".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}

fn parse_group(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Group, Error> {
    let mut group = Group {
        attrs: group_attrs_from_start(start)?,
        groups: Vec::new(),
        implementations: Vec::new(),
    };
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) => {
                let name = local_name(e);
                match name.as_str() {
                    "group" => group.groups.push(parse_group(reader, e)?),
                    "implementation" => {
                        group
                            .implementations
                            .push(parse_implementation(reader, e, &GroupAttrs::default())?);
                    }
                    "command" => group.attrs.commands.push(parse_command(reader, e)?),
                    "requires" | "runner" => {
                        group.attrs.dependencies.push(parse_dependency(reader, e)?)
                    }
                    "restricts" => group.attrs.restrictions.push(parse_dependency(reader, e)?),
                    _ if is_binding(&name) => group.attrs.bindings.push(parse_binding(reader, e, &name)?),
                    _ => skip_to_end(reader, e)?,
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"group" => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document inside <group>".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(group)
}

fn parse_implementation(
    reader: &mut Reader<&[u8]>,
    start: &BytesStart,
    _inherited: &GroupAttrs,
) -> Result<RawImplementation, Error> {
    let id = attr(start, "id").ok_or_else(|| Error::InvalidData {
        message: "<implementation> missing id attribute".to_string(),
    })?;
    let mut impl_ = RawImplementation {
        id,
        manifest_digests: Vec::new(),
        attrs: group_attrs_from_start(start)?,
        retrieval_methods: Vec::new(),
    };

    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) => {
                let name = local_name(e);
                match name.as_str() {
                    "manifest-digest" => {
                        impl_.manifest_digests.extend(manifest_digest_ids(e));
                        skip_to_end(reader, e)?;
                    }
                    "command" => impl_.attrs.commands.push(parse_command(reader, e)?),
                    "requires" | "runner" => {
                        impl_.attrs.dependencies.push(parse_dependency(reader, e)?)
                    }
                    "restricts" => impl_.attrs.restrictions.push(parse_dependency(reader, e)?),
                    "archive" => {
                        impl_.retrieval_methods.push(parse_archive(e)?);
                        skip_to_end(reader, e)?;
                    }
                    "file" => {
                        impl_.retrieval_methods.push(parse_single_file(e)?);
                        skip_to_end(reader, e)?;
                    }
                    "recipe" => impl_.retrieval_methods.push(parse_recipe(reader, e)?),
                    _ if is_binding(&name) => impl_.attrs.bindings.push(parse_binding(reader, e, &name)?),
                    _ => skip_to_end(reader, e)?,
                }
            }
            Event::Empty(ref e) => {
                let name = local_name(e);
                match name.as_str() {
                    "manifest-digest" => impl_.manifest_digests.extend(manifest_digest_ids(e)),
                    "archive" => impl_.retrieval_methods.push(parse_archive(e)?),
                    "file" => impl_.retrieval_methods.push(parse_single_file(e)?),
                    _ => {}
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"implementation" => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document inside <implementation>".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(impl_)
}

fn manifest_digest_ids(e: &BytesStart) -> Vec<String> {
    let mut out = Vec::new();
    for known in ["sha1new", "sha256", "sha256new"] {
        if let Some(v) = attr(e, known) {
            out.push(format!(
                "{known}{}{v}",
                crate::digest::DigestFormat::ranked()
                    .iter()
                    .find(|f| f.prefix() == known)
                    .unwrap()
                    .separator()
            ));
        }
    }
    out
}

fn parse_command(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Command, Error> {
    let name = attr(start, "name").unwrap_or_else(|| "run".to_string());
    let path = attr(start, "path");
    let mut command = Command {
        name,
        path,
        dependencies: Vec::new(),
        bindings: Vec::new(),
    };
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) => {
                let name = local_name(e);
                match name.as_str() {
                    "requires" | "runner" => command.dependencies.push(parse_dependency(reader, e)?),
                    _ if is_binding(&name) => command.bindings.push(parse_binding(reader, e, &name)?),
                    _ => skip_to_end(reader, e)?,
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"command" => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document inside <command>".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(command)
}

fn parse_dependency(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<Dependency, Error> {
    let interface = attr(start, "interface").ok_or_else(|| Error::InvalidData {
        message: "<requires> missing interface attribute".to_string(),
    })?;
    let importance = match attr(start, "importance").as_deref() {
        Some("recommended") => Importance::Recommended,
        _ => Importance::Essential,
    };
    let version = attr(start, "version").and_then(|v| crate::version::VersionRange::parse(&v));
    skip_to_end(reader, start)?;
    Ok(Dependency {
        interface,
        importance,
        version,
    })
}

fn is_binding(name: &str) -> bool {
    matches!(name, "environment" | "executable-in-path" | "executable-in-var")
}

fn parse_binding(reader: &mut Reader<&[u8]>, start: &BytesStart, name: &str) -> Result<Binding, Error> {
    let binding = match name {
        "environment" => Binding::Environment {
            name: attr(start, "name").unwrap_or_default(),
            insert: attr(start, "insert"),
            value: attr(start, "value"),
            mode: match attr(start, "mode").as_deref() {
                Some("append") => EnvironmentMode::Append,
                Some("replace") => EnvironmentMode::Replace,
                _ => EnvironmentMode::Prepend,
            },
        },
        _ => Binding::Executable {
            name: attr(start, "name").unwrap_or_default(),
        },
    };
    skip_to_end(reader, start)?;
    Ok(binding)
}

fn parse_archive(e: &BytesStart) -> Result<RetrievalMethod, Error> {
    let href = attr(e, "href").ok_or_else(|| Error::InvalidData {
        message: "<archive> missing href attribute".to_string(),
    })?;
    let size = attr(e, "size")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    Ok(RetrievalMethod::Archive {
        mime_type: attr(e, "type").unwrap_or_default(),
        extract_subdir: attr(e, "extract"),
        destination: attr(e, "dest"),
        href,
        size,
    })
}

fn parse_single_file(e: &BytesStart) -> Result<RetrievalMethod, Error> {
    let href = attr(e, "href").ok_or_else(|| Error::InvalidData {
        message: "<file> missing href attribute".to_string(),
    })?;
    Ok(RetrievalMethod::SingleFile {
        destination: attr(e, "dest").ok_or_else(|| Error::InvalidData {
            message: "<file> missing dest attribute".to_string(),
        })?,
        executable: attr(e, "executable").as_deref() == Some("true"),
        href,
    })
}

fn parse_recipe(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<RetrievalMethod, Error> {
    let mut steps = Vec::new();
    let mut buf = Vec::new();
    loop {
        let event = reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })?;
        match event {
            Event::Empty(ref e) => {
                if let Some(step) = recipe_step_from(e)? {
                    steps.push(step);
                }
            }
            Event::Start(ref e) => {
                if let Some(step) = recipe_step_from(e)? {
                    steps.push(step);
                } else {
                    skip_to_end(reader, e)?;
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == b"recipe" => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document inside <recipe>".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    let _ = start;
    Ok(RetrievalMethod::Recipe { steps })
}

fn recipe_step_from(e: &BytesStart) -> Result<Option<RecipeStep>, Error> {
    let name = local_name(e);
    let step = match name.as_str() {
        "archive" => match parse_archive(e)? {
            RetrievalMethod::Archive { mime_type, extract_subdir, destination, href, size } => {
                RecipeStep::Archive { mime_type, extract_subdir, destination, href, size }
            }
            _ => unreachable!(),
        },
        "file" => match parse_single_file(e)? {
            RetrievalMethod::SingleFile { destination, executable, href } => {
                RecipeStep::SingleFile { destination, executable, href }
            }
            _ => unreachable!(),
        },
        "remove" => RecipeStep::Remove {
            path: attr(e, "path").unwrap_or_default(),
        },
        "rename" => RecipeStep::Rename {
            source: attr(e, "source").unwrap_or_default(),
            destination: attr(e, "dest").unwrap_or_default(),
        },
        "copy-from" => RecipeStep::CopyFrom {
            source: attr(e, "source").unwrap_or_default(),
            destination: attr(e, "dest").unwrap_or_default(),
            from_implementation_digest: attr(e, "id").unwrap_or_default(),
        },
        _ => return Ok(None),
    };
    Ok(Some(step))
}

fn group_attrs_from_start(start: &BytesStart) -> Result<GroupAttrs, Error> {
    let mut attrs = GroupAttrs::default();
    if let Some(arch) = attr(start, "arch") {
        attrs.arch = Some(parse_arch(&arch)?);
    }
    if let Some(stability) = attr(start, "stability") {
        attrs.stability = Some(Stability::parse(&stability).ok_or_else(|| Error::InvalidData {
            message: format!("unknown stability '{stability}'"),
        })?);
    }
    attrs.version = attr(start, "version");
    attrs.main = attr(start, "main");
    if let Some(langs) = attr(start, "langs") {
        attrs.langs = Some(langs.split_whitespace().map(str::to_string).collect());
    }
    Ok(attrs)
}

fn parse_arch(s: &str) -> Result<Architecture, Error> {
    let (os_str, cpu_str) = s.split_once('-').ok_or_else(|| Error::InvalidData {
        message: format!("malformed arch attribute '{s}'"),
    })?;
    let os = match os_str {
        "*" => Os::All,
        "Linux" => Os::Linux,
        "Solaris" => Os::Solaris,
        "MacOSX" => Os::MacOsX,
        "Windows" => Os::Windows,
        "POSIX" => Os::Posix,
        other => {
            return Err(Error::InvalidData {
                message: format!("unknown OS '{other}'"),
            })
        }
    };
    let cpu = match cpu_str {
        "*" => Cpu::All,
        "src" => Cpu::Src,
        "i386" => Cpu::I386,
        "i486" => Cpu::I486,
        "i686" => Cpu::I686,
        "x86_64" => Cpu::X64,
        "armv6l" => Cpu::ArmV6L,
        "armv7l" => Cpu::ArmV7L,
        "aarch64" => Cpu::AArch64,
        "ppc" => Cpu::Ppc,
        "ppc64" => Cpu::Ppc64,
        other => {
            return Err(Error::InvalidData {
                message: format!("unknown CPU '{other}'"),
            })
        }
    };
    Ok(Architecture { os, cpu })
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn attr(e: &BytesStart, name: &str) -> Option<String> {
    e.attributes().flatten().find_map(|a| {
        if a.key.local_name().as_ref() == name.as_bytes() {
            Some(String::from_utf8_lossy(&a.value).into_owned())
        } else {
            None
        }
    })
}

fn read_text(reader: &mut Reader<&[u8]>) -> Result<String, Error> {
    let mut buf = Vec::new();
    let mut text = String::new();
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Text(t) => {
                text.push_str(&t.decode().map_err(|e| Error::InvalidData {
                    message: format!("invalid text: {e}"),
                })?)
            }
            Event::End(_) => break,
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document reading text".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(text)
}

fn skip_to_end(reader: &mut Reader<&[u8]>, start: &BytesStart) -> Result<(), Error> {
    let name = start.name().as_ref().to_vec();
    let mut buf = Vec::new();
    let mut depth = 0u32;
    loop {
        match reader.read_event_into(&mut buf).map_err(|e| Error::InvalidData {
            message: format!("XML error: {e}"),
        })? {
            Event::Start(ref e) if e.name().as_ref() == name => depth += 1,
            Event::End(ref e) if e.name().as_ref() == name => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
            }
            Event::Eof => {
                return Err(Error::InvalidData {
                    message: "unexpected end of document while skipping element".to_string(),
                })
            }
            _ => {}
        }
        buf.clear();
    }
    Ok(())
}
