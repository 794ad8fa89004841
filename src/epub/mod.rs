//! EPUB writer. Collects sections, images and a stylesheet, then writes an EPUB 3 container
//! (mimetype, container, OPF, nav.xhtml with nested sections, toc.ncx, cover page, sections).

use crate::fragment::{xml_escape, Fragment};
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const CONTAINER_XML: &[u8] = b"<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<container version=\"1.0\" xmlns=\"urn:oasis:names:tc:opendocument:xmlns:container\">\n  <rootfiles>\n    <rootfile full-path=\"OEBPS/content.opf\" media-type=\"application/oebps-package+xml\"/>\n  </rootfiles>\n</container>";

const MIMETYPE: &[u8] = b"application/epub+zip";
const OEBPS_PREFIX: &str = "OEBPS/";

/// Errors from the EPUB writer. Fatal for the run.
#[derive(Debug, Error)]
pub enum EpubError {
    #[error("Cannot write EPUB: book title is empty.")]
    EmptyTitle,

    #[error("Cannot add subsection: unknown parent section {0}.")]
    UnknownSection(usize),

    #[error("Cannot set cover: {0} was not added as an image.")]
    UnknownImage(String),

    #[error("Cannot read {path}: {source}")]
    ReadResource {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create EPUB file: {path}: {source}")]
    CreateFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write EPUB archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl From<std::io::Error> for EpubError {
    fn from(e: std::io::Error) -> Self {
        EpubError::Zip(zip::result::ZipError::Io(e))
    }
}

/// Handle to a section added to a [BookWriter].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SectionId(usize);

impl SectionId {
    pub fn new(index: usize) -> Self {
        Self(index)
    }
}

/// The e-book container the assembly step drives.
///
/// References returned by `add_css` and `add_image` are paths usable from section HTML.
pub trait BookWriter {
    fn add_css(&mut self, path: &Path) -> Result<String, EpubError>;
    fn add_section(
        &mut self,
        html: &str,
        title: &str,
        css: Option<&str>,
    ) -> Result<SectionId, EpubError>;
    fn add_subsection(
        &mut self,
        parent: SectionId,
        html: &str,
        title: &str,
        css: Option<&str>,
    ) -> Result<SectionId, EpubError>;
    fn add_image(&mut self, path: &Path) -> Result<String, EpubError>;
    fn set_cover(&mut self, image_ref: &str) -> Result<(), EpubError>;
    fn write(&self, path: &Path) -> Result<(), EpubError>;
}

#[derive(Debug, Clone)]
struct Section {
    title: String,
    body: String,
    css: Option<String>,
    parent: Option<SectionId>,
}

#[derive(Debug, Clone)]
struct Resource {
    href: String,
    media_type: &'static str,
    data: Vec<u8>,
}

/// In-memory EPUB under construction.
#[derive(Debug, Clone)]
pub struct EpubBuilder {
    title: String,
    author: String,
    description: Option<String>,
    identifier: String,
    sections: Vec<Section>,
    stylesheets: Vec<Resource>,
    images: Vec<Resource>,
    cover: Option<String>,
}

impl EpubBuilder {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            description: None,
            identifier: "urn:sitebinder:book".to_string(),
            sections: Vec::new(),
            stylesheets: Vec::new(),
            images: Vec::new(),
            cover: None,
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    fn push_section(
        &mut self,
        parent: Option<SectionId>,
        html: &str,
        title: &str,
        css: Option<&str>,
    ) -> SectionId {
        self.sections.push(Section {
            title: title.to_string(),
            body: Fragment::new(html).to_xhtml(),
            css: css.map(String::from),
            parent,
        });
        SectionId(self.sections.len() - 1)
    }
}

fn read_resource(path: &Path) -> Result<Vec<u8>, EpubError> {
    std::fs::read(path).map_err(|e| EpubError::ReadResource {
        path: path.to_path_buf(),
        source: e,
    })
}

fn section_file(index: usize) -> String {
    format!("section-{:04}.xhtml", index + 1)
}

fn image_media_type(ext: &str) -> &'static str {
    match ext {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}

impl BookWriter for EpubBuilder {
    fn add_css(&mut self, path: &Path) -> Result<String, EpubError> {
        let data = read_resource(path)?;
        let href = format!("css/style-{}.css", self.stylesheets.len() + 1);
        self.stylesheets.push(Resource {
            href: href.clone(),
            media_type: "text/css",
            data,
        });
        Ok(href)
    }

    fn add_section(
        &mut self,
        html: &str,
        title: &str,
        css: Option<&str>,
    ) -> Result<SectionId, EpubError> {
        Ok(self.push_section(None, html, title, css))
    }

    fn add_subsection(
        &mut self,
        parent: SectionId,
        html: &str,
        title: &str,
        css: Option<&str>,
    ) -> Result<SectionId, EpubError> {
        if parent.0 >= self.sections.len() {
            return Err(EpubError::UnknownSection(parent.0));
        }
        Ok(self.push_section(Some(parent), html, title, css))
    }

    fn add_image(&mut self, path: &Path) -> Result<String, EpubError> {
        let data = read_resource(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_else(|| "jpg".to_string());
        let ext = if ext == "jpeg" { "jpg".to_string() } else { ext };
        let href = format!("images/image-{:04}.{}", self.images.len() + 1, ext);
        self.images.push(Resource {
            href: href.clone(),
            media_type: image_media_type(&ext),
            data,
        });
        Ok(href)
    }

    fn set_cover(&mut self, image_ref: &str) -> Result<(), EpubError> {
        if !self.images.iter().any(|i| i.href == image_ref) {
            return Err(EpubError::UnknownImage(image_ref.to_string()));
        }
        self.cover = Some(image_ref.to_string());
        Ok(())
    }

    /// Write the container. A cover page is always emitted: the cover image if one was set,
    /// otherwise a title page, so the spine is never empty.
    fn write(&self, path: &Path) -> Result<(), EpubError> {
        if self.title.trim().is_empty() {
            return Err(EpubError::EmptyTitle);
        }
        let path = path.to_path_buf();
        let file = std::fs::File::create(&path).map_err(|e| EpubError::CreateFile {
            path: path.clone(),
            source: e,
        })?;
        let mut zip = ZipWriter::new(file);

        let options_stored = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored)
            .unix_permissions(0o644);
        let options_deflate = SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .unix_permissions(0o644);

        // Mimetype first, uncompressed (required by the OCF container format).
        zip.start_file("mimetype", options_stored)?;
        zip.write_all(MIMETYPE)?;

        zip.start_file("META-INF/container.xml", options_deflate)?;
        zip.write_all(CONTAINER_XML)?;

        write_opf(self, &mut zip, options_deflate)?;
        write_nav_xhtml(self, &mut zip, options_deflate)?;
        write_ncx(self, &mut zip, options_deflate)?;
        write_cover_xhtml(self, &mut zip, options_deflate)?;
        write_sections(self, &mut zip, options_deflate)?;

        for resource in self.stylesheets.iter().chain(&self.images) {
            zip.start_file(format!("{}{}", OEBPS_PREFIX, resource.href), options_deflate)?;
            zip.write_all(&resource.data)?;
        }

        zip.finish()?;
        Ok(())
    }
}

fn write_opf(
    book: &EpubBuilder,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut manifest = String::from(
        r#"    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="cover" href="cover.xhtml" media-type="application/xhtml+xml"/>
"#,
    );
    for (i, css) in book.stylesheets.iter().enumerate() {
        manifest.push_str(&format!(
            "    <item id=\"css-{}\" href=\"{}\" media-type=\"{}\"/>\n",
            i + 1,
            xml_escape(&css.href),
            css.media_type
        ));
    }
    for (i, image) in book.images.iter().enumerate() {
        let properties = if book.cover.as_deref() == Some(image.href.as_str()) {
            " properties=\"cover-image\""
        } else {
            ""
        };
        manifest.push_str(&format!(
            "    <item id=\"image-{}\" href=\"{}\" media-type=\"{}\"{}/>\n",
            i + 1,
            xml_escape(&image.href),
            image.media_type,
            properties
        ));
    }
    let mut spine = String::from("    <itemref idref=\"cover\"/>\n");
    for i in 0..book.sections.len() {
        manifest.push_str(&format!(
            "    <item id=\"section-{}\" href=\"{}\" media-type=\"application/xhtml+xml\"/>\n",
            i + 1,
            section_file(i)
        ));
        spine.push_str(&format!("    <itemref idref=\"section-{}\"/>\n", i + 1));
    }

    let description_el = book
        .description
        .as_ref()
        .map(|d| format!("\n    <dc:description>{}</dc:description>", xml_escape(d)))
        .unwrap_or_default();
    let modified = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");

    let opf = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" unique-identifier="book-id" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="book-id">{id}</dc:identifier>
    <dc:title>{title}</dc:title>
    <dc:creator>{creator}</dc:creator>
    <dc:language>en</dc:language>{description_el}
    <meta property="dcterms:modified">{modified}</meta>
  </metadata>
  <manifest>
{manifest}  </manifest>
  <spine toc="ncx">
{spine}  </spine>
</package>
"#,
        id = xml_escape(&book.identifier),
        title = xml_escape(&book.title),
        creator = xml_escape(&book.author),
        description_el = description_el,
        modified = modified,
        manifest = manifest,
        spine = spine,
    );

    zip.start_file(format!("{}content.opf", OEBPS_PREFIX), options)?;
    zip.write_all(opf.as_bytes())?;
    Ok(())
}

/// Indices of sections whose parent is `parent`, in insertion order.
fn children_of(book: &EpubBuilder, parent: Option<SectionId>) -> Vec<usize> {
    book.sections
        .iter()
        .enumerate()
        .filter(|(_, s)| s.parent == parent)
        .map(|(i, _)| i)
        .collect()
}

fn nav_list(book: &EpubBuilder, parent: Option<SectionId>, depth: usize, out: &mut String) {
    let indent = "  ".repeat(depth + 2);
    out.push_str(&format!("{}<ol>\n", indent));
    for i in children_of(book, parent) {
        let title = xml_escape(&book.sections[i].title);
        out.push_str(&format!(
            "{}  <li><a href=\"{}\">{}</a>",
            indent,
            section_file(i),
            title
        ));
        if children_of(book, Some(SectionId(i))).is_empty() {
            out.push_str("</li>\n");
        } else {
            out.push('\n');
            nav_list(book, Some(SectionId(i)), depth + 2, out);
            out.push_str(&format!("{}  </li>\n", indent));
        }
    }
    out.push_str(&format!("{}</ol>\n", indent));
}

fn write_nav_xhtml(
    book: &EpubBuilder,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut list = String::new();
    if book.sections.is_empty() {
        list.push_str("    <ol>\n      <li><a href=\"cover.xhtml\">Cover</a></li>\n    </ol>\n");
    } else {
        nav_list(book, None, 0, &mut list);
    }
    let nav = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<head>
  <meta charset="UTF-8"/>
  <title>Table of Contents</title>
</head>
<body>
  <nav epub:type="toc">
    <h1>Contents</h1>
{}  </nav>
</body>
</html>
"#,
        list
    );
    zip.start_file(format!("{}nav.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(nav.as_bytes())?;
    Ok(())
}

fn ncx_points(
    book: &EpubBuilder,
    parent: Option<SectionId>,
    depth: usize,
    play_order: &mut usize,
    out: &mut String,
) {
    let indent = "  ".repeat(depth + 2);
    for i in children_of(book, parent) {
        *play_order += 1;
        out.push_str(&format!(
            "{indent}<navPoint id=\"navpoint-{n}\" playOrder=\"{order}\">\n{indent}  <navLabel><text>{label}</text></navLabel>\n{indent}  <content src=\"{src}\"/>\n",
            indent = indent,
            n = i + 1,
            order = *play_order,
            label = xml_escape(&book.sections[i].title),
            src = section_file(i),
        ));
        ncx_points(book, Some(SectionId(i)), depth + 1, play_order, out);
        out.push_str(&format!("{}</navPoint>\n", indent));
    }
}

fn write_ncx(
    book: &EpubBuilder,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let mut nav_points = String::new();
    let mut play_order = 0usize;
    ncx_points(book, None, 0, &mut play_order, &mut nav_points);
    let ncx = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/" version="2005-1">
  <head>
    <meta name="dtb:uid" content="{}"/>
  </head>
  <docTitle>
    <text>{}</text>
  </docTitle>
  <navMap>
{}  </navMap>
</ncx>
"#,
        xml_escape(&book.identifier),
        xml_escape(&book.title),
        nav_points
    );
    zip.start_file(format!("{}toc.ncx", OEBPS_PREFIX), options)?;
    zip.write_all(ncx.as_bytes())?;
    Ok(())
}

fn write_cover_xhtml(
    book: &EpubBuilder,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    let body = match &book.cover {
        Some(href) => format!(
            r#"  <div style="text-align: center;">
    <img src="{}" alt="Cover" style="max-width: 100%; height: auto;"/>
  </div>"#,
            xml_escape(href)
        ),
        None => format!(
            r#"  <div style="text-align: center; font-family: serif; margin-top: 3em;">
    <h1 style="font-size: 1.5em;">{}</h1>
    <p style="margin-top: 1em;">{}</p>
  </div>"#,
            xml_escape(&book.title),
            xml_escape(&book.author)
        ),
    };
    let cover_xhtml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>Cover</title>
</head>
<body>
{}
</body>
</html>
"#,
        body
    );
    zip.start_file(format!("{}cover.xhtml", OEBPS_PREFIX), options)?;
    zip.write_all(cover_xhtml.as_bytes())?;
    Ok(())
}

fn write_sections(
    book: &EpubBuilder,
    zip: &mut ZipWriter<impl Write + Seek>,
    options: SimpleFileOptions,
) -> Result<(), EpubError> {
    for (i, section) in book.sections.iter().enumerate() {
        let link = section
            .css
            .as_ref()
            .map(|href| {
                format!(
                    "\n  <link rel=\"stylesheet\" type=\"text/css\" href=\"{}\"/>",
                    xml_escape(href)
                )
            })
            .unwrap_or_default();
        let html = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml">
<head>
  <meta charset="UTF-8"/>
  <title>{}</title>{}
</head>
<body>
{}
</body>
</html>
"#,
            xml_escape(&section.title),
            link,
            section.body
        );
        zip.start_file(format!("{}{}", OEBPS_PREFIX, section_file(i)), options)?;
        zip.write_all(html.as_bytes())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use zip::read::ZipArchive;

    fn read_entry(path: &Path, name: &str) -> String {
        let file = std::fs::File::open(path).unwrap();
        let mut zip = ZipArchive::new(file).unwrap();
        let mut entry = zip.by_name(name).unwrap();
        let mut s = String::new();
        entry.read_to_string(&mut s).unwrap();
        s
    }

    #[test]
    fn write_rejects_empty_title() {
        let dir = tempfile::tempdir().unwrap();
        let book = EpubBuilder::new("  ", "Author");
        let result = book.write(&dir.path().join("x.epub"));
        assert!(matches!(result, Err(EpubError::EmptyTitle)));
    }

    #[test]
    fn subsection_requires_known_parent() {
        let mut book = EpubBuilder::new("T", "A");
        let result = book.add_subsection(SectionId(3), "<p>x</p>", "x", None);
        assert!(matches!(result, Err(EpubError::UnknownSection(3))));
    }

    #[test]
    fn empty_book_still_has_a_readable_spine() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.epub");
        EpubBuilder::new("Empty", "Nobody").write(&path).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let zip = ZipArchive::new(file).unwrap();
        let names: Vec<String> = zip.file_names().map(String::from).collect();
        assert!(names.contains(&"mimetype".to_string()));
        assert!(names.contains(&"OEBPS/cover.xhtml".to_string()));
        let opf = read_entry(&path, "OEBPS/content.opf");
        assert!(opf.contains("<itemref idref=\"cover\"/>"));
        let cover = read_entry(&path, "OEBPS/cover.xhtml");
        assert!(cover.contains("<h1 style=\"font-size: 1.5em;\">Empty</h1>"));
    }

    #[test]
    fn nested_sections_appear_in_nav_and_ncx() {
        let dir = tempfile::tempdir().unwrap();
        let css_path = dir.path().join("styles.css");
        std::fs::write(&css_path, "p { margin: 0; }").unwrap();
        let mut book = EpubBuilder::new("Conference", "Church").description("Crawled");
        let css = book.add_css(&css_path).unwrap();
        let s1 = book
            .add_section("<p>Saturday</p>", "Saturday Morning - Staff", Some(&css))
            .unwrap();
        book.add_subsection(s1, "<p>Talk A</p>", "Talk A - Jane", Some(&css))
            .unwrap();
        book.add_subsection(s1, "<p>Talk B</p>", "Talk B - John", Some(&css))
            .unwrap();
        book.add_section("<p>Sunday</p>", "Sunday - Staff", Some(&css))
            .unwrap();

        let path = dir.path().join("book.epub");
        book.write(&path).unwrap();

        let nav = read_entry(&path, "OEBPS/nav.xhtml");
        let a = nav.find("Talk A - Jane").unwrap();
        let b = nav.find("Talk B - John").unwrap();
        let sat = nav.find("Saturday Morning - Staff").unwrap();
        let sun = nav.find("Sunday - Staff").unwrap();
        assert!(sat < a && a < b && b < sun);
        assert_eq!(nav.matches("<ol>").count(), 2);

        let ncx = read_entry(&path, "OEBPS/toc.ncx");
        assert_eq!(ncx.matches("<navPoint").count(), 4);
        assert!(ncx.contains("playOrder=\"4\""));

        let section = read_entry(&path, "OEBPS/section-0002.xhtml");
        assert!(section.contains("<p>Talk A</p>"));
        assert!(section.contains("href=\"css/style-1.css\""));
        assert_eq!(
            read_entry(&path, "OEBPS/css/style-1.css"),
            "p { margin: 0; }"
        );
        let opf = read_entry(&path, "OEBPS/content.opf");
        assert!(opf.contains("<dc:description>Crawled</dc:description>"));
        assert!(opf.contains("idref=\"section-4\""));
    }

    #[test]
    fn images_and_cover_are_packaged() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("img-0001.JPEG");
        std::fs::write(&img, b"\xff\xd8\xff").unwrap();
        let mut book = EpubBuilder::new("T", "A");
        let href = book.add_image(&img).unwrap();
        assert_eq!(href, "images/image-0001.jpg");
        assert!(matches!(
            book.set_cover("images/nope.png"),
            Err(EpubError::UnknownImage(_))
        ));
        book.set_cover(&href).unwrap();

        let path = dir.path().join("cover.epub");
        book.write(&path).unwrap();
        let opf = read_entry(&path, "OEBPS/content.opf");
        assert!(opf.contains("href=\"images/image-0001.jpg\" media-type=\"image/jpeg\" properties=\"cover-image\""));
        let cover = read_entry(&path, "OEBPS/cover.xhtml");
        assert!(cover.contains("src=\"images/image-0001.jpg\""));
    }

    #[test]
    fn section_documents_parse_as_xml() {
        let dir = tempfile::tempdir().unwrap();
        let mut book = EpubBuilder::new("T & Co", "A");
        book.add_section(
            "<p>one&nbsp;two<br>three</p><hr><img src=\"a.jpg?x=1&amp;y=2\" alt=\"\">",
            "Fish & Chips",
            None,
        )
        .unwrap();
        let path = dir.path().join("xhtml.epub");
        book.write(&path).unwrap();

        let section = read_entry(&path, "OEBPS/section-0001.xhtml");
        assert!(section.contains("<br/>"));
        assert!(!section.contains("&nbsp;"));
        let mut reader = quick_xml::Reader::from_str(&section);
        let mut text = String::new();
        loop {
            match reader.read_event() {
                Ok(quick_xml::events::Event::Eof) => break,
                Ok(quick_xml::events::Event::Text(t)) => text.push_str(&t.unescape().unwrap()),
                Ok(_) => {}
                Err(e) => panic!("section is not well-formed XML: {}", e),
            }
        }
        assert!(text.contains("one\u{a0}two"));
    }

    #[test]
    fn add_image_reports_unreadable_file() {
        let mut book = EpubBuilder::new("T", "A");
        let result = book.add_image(Path::new("/nonexistent/sitebinder/img.png"));
        assert!(matches!(result, Err(EpubError::ReadResource { .. })));
    }
}
