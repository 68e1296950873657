//! Shader module loading and caching
//!
//! SPIR-V bytecode is located through a [`ShaderSource`], validated, turned
//! into a device shader module and cached by absolute path in a
//! [`ShaderLibrary`]. Loading the same file twice, whatever relative path it
//! was requested under, returns the same module.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{GraphicsDevice, RawHandle, ResourceKind, ShaderModuleHandle};
use crate::error::{GfxError, GfxResult};
use crate::handle::{DeviceObject, ResourceHandle};

/// First word of every SPIR-V module
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Validated SPIR-V words plus the file they came from
#[derive(Clone)]
pub struct ShaderCode {
    /// Absolute path of the source file
    pub path: PathBuf,
    /// SPIR-V words, magic number first
    pub words: Arc<[u32]>,
}

impl fmt::Debug for ShaderCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderCode")
            .field("path", &self.path)
            .field("words", &self.words.len())
            .finish()
    }
}

/// Shader module object
pub struct ShaderModuleObject;

impl DeviceObject for ShaderModuleObject {
    type Desc = ShaderCode;
    type Raw = ShaderModuleHandle;

    const KIND: ResourceKind = ResourceKind::ShaderModule;
    const NULL: ShaderModuleHandle = ShaderModuleHandle::NULL;

    fn create(device: &dyn GraphicsDevice, code: &ShaderCode) -> GfxResult<ShaderModuleHandle> {
        device.create_shader_module(&code.words)
    }

    fn destroy(device: &dyn GraphicsDevice, raw: ShaderModuleHandle) {
        device.destroy_shader_module(raw);
    }
}

/// Decode SPIR-V bytecode into words.
///
/// The byte length must be a non-zero multiple of four and the first
/// little-endian word must be [`SPIRV_MAGIC`].
pub fn parse_spirv(bytes: &[u8]) -> GfxResult<Vec<u32>> {
    if bytes.is_empty() {
        return Err(GfxError::InvalidShaderCode("empty bytecode".to_string()));
    }
    if bytes.len() % 4 != 0 {
        return Err(GfxError::InvalidShaderCode(format!(
            "bytecode length {} is not a multiple of 4",
            bytes.len()
        )));
    }

    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    if words[0] != SPIRV_MAGIC {
        return Err(GfxError::InvalidShaderCode(format!(
            "bad magic number {:#010x}",
            words[0]
        )));
    }
    Ok(words)
}

/// Where shader bytecode comes from
pub trait ShaderSource: Send + Sync {
    /// Turn a requested path into the absolute path used as cache key
    fn resolve(&self, path: &Path) -> GfxResult<PathBuf>;

    /// Read the bytecode at an absolute path returned by [`resolve`](Self::resolve)
    fn read(&self, path: &Path) -> GfxResult<Vec<u8>>;
}

/// Reads shaders from the file system.
///
/// Relative paths are looked up in each search directory in order, then
/// relative to the working directory.
#[derive(Debug, Clone, Default)]
pub struct FsShaderSource {
    search_dirs: Vec<PathBuf>,
}

impl FsShaderSource {
    /// Create a source searching `dirs`
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            search_dirs: dirs.into_iter().map(Into::into).collect(),
        }
    }

    /// Directories searched for relative paths
    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }
}

fn load_error(path: &Path, reason: impl fmt::Display) -> GfxError {
    GfxError::ShaderLoad {
        path: path.display().to_string(),
        reason: reason.to_string(),
    }
}

impl ShaderSource for FsShaderSource {
    fn resolve(&self, path: &Path) -> GfxResult<PathBuf> {
        let candidates = if path.is_absolute() {
            vec![path.to_path_buf()]
        } else {
            self.search_dirs
                .iter()
                .map(|dir| dir.join(path))
                .chain(std::iter::once(path.to_path_buf()))
                .collect()
        };

        candidates
            .into_iter()
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| load_error(path, "file not found in any search directory"))?
            .canonicalize()
            .map_err(|e| load_error(path, e))
    }

    fn read(&self, path: &Path) -> GfxResult<Vec<u8>> {
        std::fs::read(path).map_err(|e| load_error(path, e))
    }
}

/// Device shader module created from a SPIR-V file
#[derive(Debug)]
pub struct ShaderModule {
    handle: ResourceHandle<ShaderModuleObject>,
}

impl ShaderModule {
    /// Create a module from bytecode already in memory
    pub fn from_bytes(device: &Arc<dyn GraphicsDevice>, path: &Path, bytes: &[u8]) -> GfxResult<Self> {
        let words = parse_spirv(bytes).map_err(|e| match e {
            GfxError::InvalidShaderCode(reason) => {
                GfxError::InvalidShaderCode(format!("{}: {reason}", path.display()))
            }
            other => other,
        })?;
        let code = ShaderCode {
            path: path.to_path_buf(),
            words: words.into(),
        };
        let label = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Ok(Self {
            handle: ResourceHandle::create(device, code, label)?,
        })
    }

    /// Get shader module handle
    pub fn handle(&self) -> ShaderModuleHandle {
        self.handle.expect_live()
    }

    /// Absolute path the module was loaded from
    pub fn path(&self) -> &Path {
        &self.handle.desc().path
    }

    /// Size of the bytecode in 32-bit words
    pub fn word_count(&self) -> usize {
        self.handle.desc().words.len()
    }
}

/// Cache of shader modules keyed by absolute path
pub struct ShaderLibrary {
    device: Arc<dyn GraphicsDevice>,
    source: Box<dyn ShaderSource>,
    modules: Mutex<HashMap<PathBuf, Arc<ShaderModule>>>,
}

impl ShaderLibrary {
    /// Create a library reading through `source`
    pub fn new(device: &Arc<dyn GraphicsDevice>, source: impl ShaderSource + 'static) -> Self {
        Self {
            device: Arc::clone(device),
            source: Box::new(source),
            modules: Mutex::new(HashMap::new()),
        }
    }

    /// Create a library reading from the file system
    pub fn with_search_dirs<I, P>(device: &Arc<dyn GraphicsDevice>, dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self::new(device, FsShaderSource::new(dirs))
    }

    /// Return the module for `path`, loading it on first request
    pub fn get_or_load(&self, path: impl AsRef<Path>) -> GfxResult<Arc<ShaderModule>> {
        let absolute = self.source.resolve(path.as_ref())?;
        let mut modules = self.modules.lock();
        if let Some(module) = modules.get(&absolute) {
            return Ok(Arc::clone(module));
        }

        log::debug!("Loading shader {}", absolute.display());
        let bytes = self.source.read(&absolute)?;
        let module = Arc::new(ShaderModule::from_bytes(&self.device, &absolute, &bytes)?);
        modules.insert(absolute, Arc::clone(&module));
        Ok(module)
    }

    /// Whether `path` resolves to an already loaded module
    pub fn is_cached(&self, path: impl AsRef<Path>) -> bool {
        self.source
            .resolve(path.as_ref())
            .is_ok_and(|absolute| self.modules.lock().contains_key(&absolute))
    }

    /// Number of cached modules
    pub fn len(&self) -> usize {
        self.modules.lock().len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.modules.lock().is_empty()
    }

    /// Forget every cached module; modules still shared elsewhere stay alive
    pub fn clear(&self) {
        self.modules.lock().clear();
    }
}

impl fmt::Debug for ShaderLibrary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShaderLibrary")
            .field("modules", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::SoftwareDevice;

    fn spirv(extra_words: u32) -> Vec<u8> {
        std::iter::once(SPIRV_MAGIC)
            .chain(0..extra_words)
            .flat_map(u32::to_le_bytes)
            .collect()
    }

    fn library(dir: &Path) -> (Arc<SoftwareDevice>, ShaderLibrary) {
        let software = Arc::new(SoftwareDevice::new());
        let device: Arc<dyn GraphicsDevice> = software.clone();
        (software, ShaderLibrary::with_search_dirs(&device, [dir]))
    }

    #[test]
    fn test_parse_rejects_malformed_bytecode() {
        assert!(matches!(parse_spirv(&[]), Err(GfxError::InvalidShaderCode(_))));
        assert!(matches!(
            parse_spirv(&spirv(1)[..7]),
            Err(GfxError::InvalidShaderCode(_))
        ));
        assert!(matches!(
            parse_spirv(&[0xde, 0xad, 0xbe, 0xef]),
            Err(GfxError::InvalidShaderCode(_))
        ));
        assert_eq!(parse_spirv(&spirv(2)).unwrap(), vec![SPIRV_MAGIC, 0, 1]);
    }

    #[test]
    fn test_same_file_loads_once() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("triangle.vert.spv"), spirv(4)).unwrap();
        let (software, library) = library(dir.path());

        let a = library.get_or_load("triangle.vert.spv").unwrap();
        let b = library
            .get_or_load(dir.path().join("triangle.vert.spv"))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.word_count(), 5);
        assert!(a.path().is_absolute());
        assert!(library.is_cached("triangle.vert.spv"));
        assert_eq!(software.created_count(ResourceKind::ShaderModule), 1);
    }

    #[test]
    fn test_search_dirs_are_tried_in_order() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        std::fs::write(second.path().join("only_here.spv"), spirv(1)).unwrap();

        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new());
        let library = ShaderLibrary::with_search_dirs(&device, [first.path(), second.path()]);
        let module = library.get_or_load("only_here.spv").unwrap();
        assert!(module.path().starts_with(second.path().canonicalize().unwrap()));
    }

    #[test]
    fn test_missing_and_invalid_files_fail() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("garbage.spv"), b"not spirv").unwrap();
        let (software, library) = library(dir.path());

        assert!(matches!(
            library.get_or_load("missing.spv"),
            Err(GfxError::ShaderLoad { .. })
        ));
        assert!(matches!(
            library.get_or_load("garbage.spv"),
            Err(GfxError::InvalidShaderCode(_))
        ));
        assert!(library.is_empty());
        assert_eq!(software.created_count(ResourceKind::ShaderModule), 0);
    }

    #[test]
    fn test_clear_destroys_unshared_modules() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.spv"), spirv(1)).unwrap();
        std::fs::write(dir.path().join("b.spv"), spirv(1)).unwrap();
        let (software, library) = library(dir.path());

        let kept = library.get_or_load("a.spv").unwrap();
        library.get_or_load("b.spv").unwrap();
        assert_eq!(library.len(), 2);

        library.clear();
        assert_eq!(software.live_count(ResourceKind::ShaderModule), 1);
        drop(kept);
        assert_eq!(software.live_count(ResourceKind::ShaderModule), 0);
    }
}
