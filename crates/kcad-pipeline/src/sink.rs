//! 输出接收端
//!
//! 流水线只在导出阶段结束后写出文件，且每个文件在返回前都已刷新。
//! 一组文件中任何一个写失败时，已写出的同组文件会被撤回。

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

/// 输出文件的接收端
pub trait OutputSink {
    /// 写出一个完整文件
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()>;

    /// 撤回已写出的文件；不存在时不报错
    fn discard(&mut self, name: &str) -> io::Result<()>;

    /// 已写出的文件名
    fn written(&self) -> Vec<String>;
}

/// 写入目录
#[derive(Debug)]
pub struct DirectorySink {
    dir: PathBuf,
    written: Vec<PathBuf>,
}

impl DirectorySink {
    /// 目录不存在时创建
    pub fn create(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            written: Vec::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.written
    }
}

impl OutputSink for DirectorySink {
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.dir.join(name);
        // 先写临时文件再改名，目标路径上不会出现半个文件
        let partial = self.dir.join(format!("{}.part", name));
        let result = (|| -> io::Result<()> {
            let mut writer = BufWriter::new(File::create(&partial)?);
            writer.write_all(bytes)?;
            // into_inner 会刷新缓冲并返回刷新错误
            let file = writer.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            std::fs::rename(&partial, &path)
        })();
        if let Err(e) = result {
            let _ = std::fs::remove_file(&partial);
            return Err(e);
        }
        debug!("Wrote {} ({} bytes)", path.display(), bytes.len());
        self.written.retain(|p| p != &path);
        self.written.push(path);
        Ok(())
    }

    fn discard(&mut self, name: &str) -> io::Result<()> {
        let path = self.dir.join(name);
        let Some(pos) = self.written.iter().position(|p| p == &path) else {
            return Ok(());
        };
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        self.written.remove(pos);
        debug!("Discarded {}", path.display());
        Ok(())
    }

    fn written(&self) -> Vec<String> {
        self.written
            .iter()
            .map(|p| p.display().to_string())
            .collect()
    }
}

/// 内存接收端，供嵌入调用和测试使用
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }
}

impl OutputSink for MemorySink {
    fn write_file(&mut self, name: &str, bytes: &[u8]) -> io::Result<()> {
        self.files.insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn discard(&mut self, name: &str) -> io::Result<()> {
        self.files.remove(name);
        Ok(())
    }

    fn written(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directory_sink_write_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path().join("out")).unwrap();
        sink.write_file("plan.mif", b"Version 300").unwrap();
        sink.write_file("plan.mid", b"").unwrap();
        assert_eq!(sink.paths().len(), 2);
        // 不留下临时文件
        assert!(!sink.dir().join("plan.mif.part").exists());

        sink.discard("plan.mif").unwrap();
        assert!(!sink.dir().join("plan.mif").exists());
        assert_eq!(sink.written().len(), 1);
        // 重复撤回或撤回未写出的文件都不报错
        sink.discard("plan.mif").unwrap();
        sink.discard("other.dxf").unwrap();
    }

    #[test]
    fn test_rewrite_keeps_single_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::create(dir.path()).unwrap();
        sink.write_file("plan.dxf", b"a").unwrap();
        sink.write_file("plan.dxf", b"b").unwrap();
        assert_eq!(sink.paths().len(), 1);
        assert_eq!(std::fs::read(dir.path().join("plan.dxf")).unwrap(), b"b");
    }

    #[test]
    fn test_memory_sink_discard() {
        let mut sink = MemorySink::new();
        sink.write_file("plan.dxf", b"0\nEOF\n").unwrap();
        sink.discard("plan.dxf").unwrap();
        assert!(sink.is_empty());
    }
}
