use camino::Utf8PathBuf;

/// A 32-byte BLAKE3 hash used for content-addressing.
///
/// The image task keys its optimization cache by the hash of the source bytes,
/// so an unchanged image is never re-encoded.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub(crate) struct Hash32([u8; 32]);

impl<T> From<T> for Hash32
where
    T: Into<[u8; 32]>,
{
    fn from(value: T) -> Self {
        Hash32(value.into())
    }
}

impl Hash32 {
    pub(crate) fn hash(buffer: impl AsRef<[u8]>) -> Self {
        blake3::Hasher::new()
            .update(buffer.as_ref())
            .finalize()
            .into()
    }

    pub(crate) fn to_hex(self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut acc = String::with_capacity(64);

        for &byte in &self.0 {
            acc.push(HEX[(byte >> 4) as usize] as char);
            acc.push(HEX[(byte & 0xF) as usize] as char);
        }

        acc
    }
}

impl std::fmt::Debug for Hash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Hash32({})", self.to_hex())
    }
}

/// The mode in which the pipeline is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// A one-time build.
    Build,
    /// A continuous watch mode for development.
    Watch,
}

/// File name of the single stylesheet written by the CSS task.
pub const CSS_OUTPUT: &str = "production.css";
/// File name of the single script written by the JS task.
pub const JS_OUTPUT: &str = "production.js";
/// Default port of the development server.
pub const HTTP_PORT: u16 = 8080;
/// Image extensions picked up by the image task.
pub const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpeg", "jpg", "gif", "svg"];

/// Where sources are read from and where outputs are written to.
///
/// Every path is derived from a single project root, so the same pipeline can
/// run against the current directory or against a scratch directory.
#[derive(Debug, Clone)]
pub struct Layout {
    /// Project root all other paths are relative to.
    pub root: Utf8PathBuf,
    /// Pages, plus partials in subdirectories.
    pub html: Utf8PathBuf,
    /// Sass partials.
    pub styles: Utf8PathBuf,
    /// The one stylesheet compiled by the CSS task.
    pub style_entry: Utf8PathBuf,
    /// Script sources, concatenated recursively.
    pub scripts: Utf8PathBuf,
    /// Image sources.
    pub images: Utf8PathBuf,
    /// Output root served by the dev server.
    pub dist: Utf8PathBuf,
    /// Scratch space kept between runs.
    pub cache: Utf8PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        let root = root.into();

        Self {
            html: root.join("src/html"),
            styles: root.join("src/scss"),
            style_entry: root.join("src/scss/main.scss"),
            scripts: root.join("src/js"),
            images: root.join("src/img"),
            dist: root.join("dist"),
            cache: root.join(".cache"),
            root,
        }
    }

    pub fn dist_css(&self) -> Utf8PathBuf {
        self.dist.join("css")
    }

    pub fn dist_js(&self) -> Utf8PathBuf {
        self.dist.join("js")
    }

    pub fn dist_img(&self) -> Utf8PathBuf {
        self.dist.join("img")
    }

    pub fn cache_img(&self) -> Utf8PathBuf {
        self.cache.join("img")
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Global configuration and state available to all tasks.
#[derive(Debug, Clone)]
pub struct Environment {
    /// The current run mode (Build or Watch).
    pub mode: Mode,
    /// The port of the live-reload socket (if running).
    pub port: Option<u16>,
    /// Source and output paths.
    pub layout: Layout,
}

impl Environment {
    pub fn new(mode: Mode, layout: Layout) -> Self {
        Self {
            mode,
            port: None,
            layout,
        }
    }

    /// Returns a JavaScript snippet to enable live-reloading.
    ///
    /// If running in `Watch` mode with a reload socket, this returns a script
    /// that connects to the WebSocket server and reloads the page on any
    /// message.
    pub fn get_refresh_script(&self) -> Option<String> {
        match self.mode {
            Mode::Build => None,
            Mode::Watch => self.port.map(|port| {
                format!(
                    r#"
const socket = new WebSocket("ws://localhost:{port}");
socket.addEventListener("message", event => {{
    window.location.reload();
}});
"#
                )
            }),
        }
    }
}
