use anyhow::{anyhow, Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Chain, Cursor, Read};
use std::path::Path;

type ChainReader = Chain<Cursor<Vec<u8>>, File>;
type GzipReader = BufReader<MultiGzDecoder<ChainReader>>;
type ZstdReader = BufReader<zstd::Decoder<'static, BufReader<ChainReader>>>;
type PlainReader = BufReader<ChainReader>;

/// Compression formats recognized by their magic bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// 1F 8B 08
    Gzip,
    /// 28 B5 2F FD
    Zstd,
    None,
}

impl Compression {
    pub fn detect(head: &[u8]) -> Self {
        match head {
            [0x1F, 0x8B, 0x08, ..] => Compression::Gzip,
            [0x28, 0xB5, 0x2F, 0xFD, ..] => Compression::Zstd,
            _ => Compression::None,
        }
    }
}

/// Timer file reader with transparent decompression
pub enum DecompressionReader {
    Gzip(GzipReader),
    Zstd(ZstdReader),
    Plain(PlainReader),
}

// Manually implement Debug since zstd::Decoder doesn't implement it
impl std::fmt::Debug for DecompressionReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecompressionReader::Gzip(_) => write!(f, "DecompressionReader::Gzip"),
            DecompressionReader::Zstd(_) => write!(f, "DecompressionReader::Zstd"),
            DecompressionReader::Plain(_) => write!(f, "DecompressionReader::Plain"),
        }
    }
}

impl BufRead for DecompressionReader {
    fn fill_buf(&mut self) -> std::io::Result<&[u8]> {
        match self {
            DecompressionReader::Gzip(reader) => reader.fill_buf(),
            DecompressionReader::Zstd(reader) => reader.fill_buf(),
            DecompressionReader::Plain(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match self {
            DecompressionReader::Gzip(reader) => reader.consume(amt),
            DecompressionReader::Zstd(reader) => reader.consume(amt),
            DecompressionReader::Plain(reader) => reader.consume(amt),
        }
    }
}

impl Read for DecompressionReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self {
            DecompressionReader::Gzip(reader) => reader.read(buf),
            DecompressionReader::Zstd(reader) => reader.read(buf),
            DecompressionReader::Plain(reader) => reader.read(buf),
        }
    }
}

impl DecompressionReader {
    /// Open `path`, detecting the compression from the first bytes.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
            if extension.eq_ignore_ascii_case("zip") {
                return Err(anyhow!(
                    "ZIP archives are not supported, only gzip and zstd compressed timer files: {}",
                    path.display()
                ));
            }
        }

        let mut file =
            File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

        let mut head = [0u8; 4];
        let n = read_head(&mut file, &mut head)
            .with_context(|| format!("Failed to read {}", path.display()))?;

        // Put the read bytes back in front using a cursor chain
        let chained = Cursor::new(head[..n].to_vec()).chain(file);

        match Compression::detect(&head[..n]) {
            Compression::Gzip => Ok(DecompressionReader::Gzip(BufReader::new(
                MultiGzDecoder::new(chained),
            ))),
            Compression::Zstd => {
                let decoder = zstd::Decoder::new(chained)
                    .with_context(|| format!("Failed to start zstd decoder for {}", path.display()))?;
                Ok(DecompressionReader::Zstd(BufReader::new(decoder)))
            }
            Compression::None => Ok(DecompressionReader::Plain(BufReader::new(chained))),
        }
    }

    pub fn compression(&self) -> Compression {
        match self {
            DecompressionReader::Gzip(_) => Compression::Gzip,
            DecompressionReader::Zstd(_) => Compression::Zstd,
            DecompressionReader::Plain(_) => Compression::None,
        }
    }
}

/// Fill `head` as far as the file allows; short files yield fewer bytes.
fn read_head(file: &mut File, head: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < head.len() {
        match file.read(&mut head[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
