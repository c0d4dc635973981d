//! Safetensors-backed classifier weight loading.

use std::path::Path;

use memmap2::MmapOptions;
use safetensors::tensor::{Dtype, SafeTensorError};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct TensorF32 {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Debug)]
pub struct WeightStore {
    mmap: memmap2::Mmap,
}

#[derive(Debug, Error)]
pub enum WeightError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("safetensors error: {0}")]
    SafeTensors(#[from] SafeTensorError),
    #[error("unsupported dtype for {name}: {dtype:?}")]
    UnsupportedDtype { name: String, dtype: Dtype },
    #[error("invalid tensor byte length for {name}: got {bytes}, expected multiple of {elem_size}")]
    InvalidByteLen {
        name: String,
        bytes: usize,
        elem_size: usize,
    },
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = u32::from(bits >> 15) << 31;
    let exp = u32::from((bits >> 10) & 0x1f);
    let frac = u32::from(bits & 0x3ff);

    let out = match (exp, frac) {
        (0, 0) => sign,
        (0, _) => {
            // subnormal: value = frac * 2^-24
            let v = (frac as f32) * f32::from_bits(0x3380_0000);
            return if sign != 0 { -v } else { v };
        }
        (0x1f, _) => sign | 0x7f80_0000 | (frac << 13),
        _ => sign | ((exp + 112) << 23) | (frac << 13),
    };
    f32::from_bits(out)
}

fn check_len(name: &str, raw: &[u8], elem_size: usize) -> Result<(), WeightError> {
    if raw.len() % elem_size != 0 {
        return Err(WeightError::InvalidByteLen {
            name: name.to_string(),
            bytes: raw.len(),
            elem_size,
        });
    }
    Ok(())
}

impl WeightStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WeightError> {
        let file = std::fs::File::open(path)?;
        // SAFETY: read-only file mapping for immutable tensor access.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        // Fail early on a corrupt header.
        safetensors::SafeTensors::deserialize(&mmap)?;
        Ok(Self { mmap })
    }

    pub fn names(&self) -> Result<Vec<String>, WeightError> {
        let st = safetensors::SafeTensors::deserialize(&self.mmap)?;
        Ok(st.names().into_iter().map(ToString::to_string).collect())
    }

    pub fn contains(&self, name: &str) -> Result<bool, WeightError> {
        let st = safetensors::SafeTensors::deserialize(&self.mmap)?;
        Ok(st.tensor(name).is_ok())
    }

    /// Read one tensor and widen it to `f32` (F32, F16 and BF16 are accepted).
    pub fn tensor_f32(&self, name: &str) -> Result<TensorF32, WeightError> {
        let st = safetensors::SafeTensors::deserialize(&self.mmap)?;
        let tv = st.tensor(name)?;
        let dtype = tv.dtype();
        let shape = tv.shape().to_vec();
        let raw = tv.data();

        let data = match dtype {
            Dtype::F32 => {
                check_len(name, raw, 4)?;
                raw.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect()
            }
            Dtype::F16 => {
                check_len(name, raw, 2)?;
                raw.chunks_exact(2)
                    .map(|c| f16_to_f32(u16::from_le_bytes([c[0], c[1]])))
                    .collect()
            }
            Dtype::BF16 => {
                check_len(name, raw, 2)?;
                raw.chunks_exact(2)
                    .map(|c| {
                        let bits = u16::from_le_bytes([c[0], c[1]]) as u32;
                        f32::from_bits(bits << 16)
                    })
                    .collect()
            }
            other => {
                return Err(WeightError::UnsupportedDtype {
                    name: name.to_string(),
                    dtype: other,
                });
            }
        };

        Ok(TensorF32 { shape, data })
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    use safetensors::tensor::{Dtype, View, serialize_to_file};

    use super::{WeightError, WeightStore, f16_to_f32};

    #[derive(Debug, Clone)]
    struct TestTensor {
        dtype: Dtype,
        shape: Vec<usize>,
        data: Vec<u8>,
    }

    impl View for TestTensor {
        fn dtype(&self) -> Dtype {
            self.dtype
        }

        fn shape(&self) -> &[usize] {
            &self.shape
        }

        fn data(&self) -> Cow<'_, [u8]> {
            Cow::Borrowed(&self.data)
        }

        fn data_len(&self) -> usize {
            self.data.len()
        }
    }

    fn tmp_file(name: &str) -> PathBuf {
        let mut p = std::env::temp_dir();
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos();
        p.push(format!("antifoley-weights-test-{name}-{nanos}.safetensors"));
        p
    }

    #[test]
    fn f16_conversion_known_values() {
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x3800), 0.5);
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert_eq!(f16_to_f32(0x0001), 2.0f32.powi(-24));
        assert!(f16_to_f32(0x7c00).is_infinite());
    }

    #[test]
    fn loads_f32_f16_and_bf16_tensors() {
        let f32_data = vec![1.0f32, 2.5, -3.0, 4.25];
        let f32_bytes: Vec<u8> = f32_data.iter().flat_map(|v| v.to_le_bytes()).collect();
        let f16_bytes: Vec<u8> = [0x3c00u16, 0xc000].iter().flat_map(|w| w.to_le_bytes()).collect();
        let bf16_bytes: Vec<u8> = [0x3f80u16, 0xc000].iter().flat_map(|w| w.to_le_bytes()).collect();
        let i64_bytes = 5i64.to_le_bytes().to_vec();

        let tensors = vec![
            (
                "conv1.weight".to_string(),
                TestTensor {
                    dtype: Dtype::F32,
                    shape: vec![2, 2],
                    data: f32_bytes,
                },
            ),
            (
                "bn1.weight".to_string(),
                TestTensor {
                    dtype: Dtype::F16,
                    shape: vec![2],
                    data: f16_bytes,
                },
            ),
            (
                "bn1.bias".to_string(),
                TestTensor {
                    dtype: Dtype::BF16,
                    shape: vec![2],
                    data: bf16_bytes,
                },
            ),
            (
                "bn1.num_batches_tracked".to_string(),
                TestTensor {
                    dtype: Dtype::I64,
                    shape: vec![],
                    data: i64_bytes,
                },
            ),
        ];

        let path = tmp_file("basic");
        serialize_to_file(tensors, &None, &path).expect("serialize safetensors");

        let ws = WeightStore::open(&path).expect("open");
        let names = ws.names().expect("names");
        assert_eq!(names.len(), 4);
        assert!(ws.contains("conv1.weight").expect("contains"));
        assert!(!ws.contains("fc9.weight").expect("contains"));

        let a = ws.tensor_f32("conv1.weight").expect("f32");
        assert_eq!(a.shape, vec![2, 2]);
        assert_eq!(a.data, f32_data);

        let b = ws.tensor_f32("bn1.weight").expect("f16");
        assert_eq!(b.data, vec![1.0, -2.0]);

        let c = ws.tensor_f32("bn1.bias").expect("bf16");
        assert_eq!(c.data, vec![1.0, -2.0]);

        let err = ws.tensor_f32("bn1.num_batches_tracked").expect_err("i64");
        assert!(matches!(err, WeightError::UnsupportedDtype { .. }));

        std::fs::remove_file(path).expect("cleanup");
    }

    #[test]
    fn open_rejects_non_safetensors() {
        let path = tmp_file("garbage");
        std::fs::write(&path, b"not a checkpoint").expect("write");
        assert!(WeightStore::open(&path).is_err());
        std::fs::remove_file(path).expect("cleanup");
    }
}
