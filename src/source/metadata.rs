//! Yum repository metadata parsing (`repomd.xml`, `primary.xml`).

use anyhow::{Context, Result, bail};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};

use crate::repo::validate_path_component;

use super::Package;

/// Find the `<location href>` of the `primary` data entry in `repomd.xml`.
pub fn find_primary_href(repomd_xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(repomd_xml);
    reader.config_mut().trim_text(true);

    let mut in_primary = false;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let local = tag_local(e);

                if local == "data" {
                    in_primary = attr_value(e, "type")?.as_deref() == Some("primary");
                }

                if in_primary
                    && local == "location"
                    && let Some(href) = attr_value(e, "href")?
                {
                    return Ok(href);
                }
            }
            Event::End(ref e) => {
                if local_name(std::str::from_utf8(e.name().as_ref()).unwrap_or("")) == "data" {
                    in_primary = false;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    bail!("no <data type=\"primary\"> found in repomd.xml")
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum TextField {
    Name,
    Arch,
}

#[derive(Default)]
struct PackageBuilder {
    name: String,
    arch: String,
    epoch: String,
    version: String,
    release: String,
    location: String,
}

impl PackageBuilder {
    fn build(self) -> Result<Package> {
        if self.name.is_empty()
            || self.arch.is_empty()
            || self.version.is_empty()
            || self.location.is_empty()
        {
            bail!(
                "incomplete <package> entry in primary.xml (name: {:?})",
                self.name
            );
        }
        // These fields become the pool file name, so none may act as a path
        for (what, value) in [
            ("package name", &self.name),
            ("package version", &self.version),
            ("package release", &self.release),
            ("package arch", &self.arch),
        ] {
            validate_path_component(what, value)?;
        }

        let epoch = if self.epoch.is_empty() {
            0
        } else {
            self.epoch
                .parse()
                .with_context(|| format!("invalid epoch {:?} for {}", self.epoch, self.name))?
        };

        Ok(Package::new(self.name, self.version, self.release, self.arch)
            .with_epoch(epoch)
            .with_location(self.location))
    }
}

/// Parse every `<package>` in `primary.xml`, in document order.
///
/// Only direct children of `<package>` are read, so format entries such as
/// `<rpm:entry name=...>` never leak into the package fields.
pub fn parse_primary(xml: &str) -> Result<Vec<Package>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut packages = Vec::new();
    let mut current: Option<PackageBuilder> = None;
    // Nesting depth below the current <package>
    let mut depth = 0usize;
    let mut field: Option<TextField> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let local = tag_local(e);
                if current.is_none() {
                    if local == "package" {
                        current = Some(PackageBuilder::default());
                        depth = 0;
                    }
                    continue;
                }

                depth += 1;
                if depth == 1 {
                    field = match local.as_str() {
                        "name" => Some(TextField::Name),
                        "arch" => Some(TextField::Arch),
                        _ => None,
                    };
                    if let Some(pkg) = current.as_mut() {
                        read_version_or_location(e, &local, pkg)?;
                    }
                }
            }
            Event::Empty(ref e) => {
                if depth == 0
                    && let Some(pkg) = current.as_mut()
                {
                    read_version_or_location(e, &tag_local(e), pkg)?;
                }
            }
            Event::Text(ref e) => {
                if let (Some(pkg), Some(f)) = (current.as_mut(), field) {
                    let text = e.unescape()?.trim().to_string();
                    match f {
                        TextField::Name => pkg.name = text,
                        TextField::Arch => pkg.arch = text,
                    }
                }
            }
            Event::End(_) => {
                if current.is_none() {
                    continue;
                }
                field = None;
                if depth == 0 {
                    if let Some(pkg) = current.take() {
                        packages.push(pkg.build()?);
                    }
                } else {
                    depth -= 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(packages)
}

fn read_version_or_location(
    e: &BytesStart<'_>,
    local: &str,
    pkg: &mut PackageBuilder,
) -> Result<()> {
    match local {
        "version" => {
            pkg.epoch = attr_value(e, "epoch")?.unwrap_or_default();
            pkg.version = attr_value(e, "ver")?.unwrap_or_default();
            pkg.release = attr_value(e, "rel")?.unwrap_or_default();
        }
        "location" => {
            pkg.location = attr_value(e, "href")?.unwrap_or_default();
        }
        _ => {}
    }
    Ok(())
}

fn attr_value(e: &BytesStart<'_>, key: &str) -> Result<Option<String>> {
    for attr in e.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn tag_local(e: &BytesStart<'_>) -> String {
    let raw = std::str::from_utf8(e.name().as_ref()).unwrap_or("").to_string();
    local_name(&raw).to_string()
}

/// Strip namespace prefix: "rpm:entry" -> "entry", "data" -> "data"
fn local_name(tag: &str) -> &str {
    tag.rsplit_once(':').map_or(tag, |(_, local)| local)
}
