//! External-data initializers
//!
//! ONNX stores large initializers outside the protobuf, described by
//! `external_data` entries (`location`, `offset`, `length`) relative to the
//! model file's directory.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use crate::error::{ImportError, ImportResult};
use crate::proto::{tensor_proto, TensorProto};
use crate::tensor::dtype_size;

fn parse_entry(tensor: &TensorProto, key: &str) -> ImportResult<Option<u64>> {
    tensor
        .external_entry(key)
        .map(|value| {
            value.parse::<u64>().map_err(|_| {
                ImportError::InvalidValue(format!(
                    "Tensor '{}': external_data {} '{}' is not an integer",
                    tensor.name, key, value
                ))
            })
        })
        .transpose()
}

/// Resolve the data file of an external tensor
///
/// The location must stay inside `base_dir`.
pub fn external_data_path(tensor: &TensorProto, base_dir: &Path) -> ImportResult<PathBuf> {
    let location = tensor.external_entry("location").ok_or_else(|| {
        ImportError::InvalidValue(format!(
            "Tensor '{}' is external but has no location",
            tensor.name
        ))
    })?;

    let relative = Path::new(location);
    let escapes = relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    if escapes {
        return Err(ImportError::InvalidValue(format!(
            "Tensor '{}': external data location '{}' must be relative to the model directory",
            tensor.name, location
        )));
    }

    Ok(base_dir.join(relative))
}

/// Read an external tensor's payload into `raw_data`
///
/// The byte range must lie inside the data file; nothing is allocated for a
/// range the file cannot back.
pub fn load_external(tensor: &TensorProto, base_dir: &Path) -> ImportResult<TensorProto> {
    let path = external_data_path(tensor, base_dir)?;
    let offset = parse_entry(tensor, "offset")?.unwrap_or(0);
    let elem_size = dtype_size(tensor.data_type_enum())?;
    let expected = tensor
        .num_elements()?
        .checked_mul(elem_size)
        .and_then(|bytes| u64::try_from(bytes).ok())
        .ok_or_else(|| {
            ImportError::InvalidValue(format!(
                "Tensor '{}': byte size of shape {:?} overflows",
                tensor.name, tensor.dims
            ))
        })?;
    let length = parse_entry(tensor, "length")?.unwrap_or(expected);

    if length != expected {
        return Err(ImportError::InvalidValue(format!(
            "Tensor '{}': external length {} does not match {} bytes implied by its shape",
            tensor.name, length, expected
        )));
    }

    let mut file = File::open(&path).map_err(|e| {
        ImportError::InvalidValue(format!(
            "Failed to open external data '{}' for tensor '{}': {}",
            path.display(),
            tensor.name,
            e
        ))
    })?;

    let file_len = file.metadata()?.len();
    let in_bounds = offset
        .checked_add(length)
        .map_or(false, |end| end <= file_len);
    if !in_bounds {
        return Err(ImportError::InvalidValue(format!(
            "Tensor '{}': {} bytes at offset {} exceed '{}' ({} bytes)",
            tensor.name,
            length,
            offset,
            path.display(),
            file_len
        )));
    }
    let length = usize::try_from(length).map_err(|_| {
        ImportError::InvalidValue(format!(
            "Tensor '{}': {} bytes do not fit in memory",
            tensor.name, length
        ))
    })?;

    file.seek(SeekFrom::Start(offset))?;
    let mut raw = vec![0u8; length];
    file.read_exact(&mut raw).map_err(|e| {
        ImportError::InvalidValue(format!(
            "Failed to read {} bytes at offset {} from '{}': {}",
            length,
            offset,
            path.display(),
            e
        ))
    })?;

    Ok(TensorProto {
        raw_data: raw,
        external_data: Vec::new(),
        data_location: tensor_proto::DataLocation::Default as i32,
        ..tensor.clone()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::StringStringEntryProto;
    use crate::tensor::tensor_to_array_f32;

    fn external_tensor(location: &str, offset: u64) -> TensorProto {
        TensorProto {
            name: "W".to_string(),
            dims: vec![2],
            data_type: tensor_proto::DataType::Float as i32,
            data_location: tensor_proto::DataLocation::External as i32,
            external_data: vec![
                StringStringEntryProto {
                    key: "location".to_string(),
                    value: location.to_string(),
                },
                StringStringEntryProto {
                    key: "offset".to_string(),
                    value: offset.to_string(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_load_external_with_offset() {
        let dir = scratch_dir("offset");
        let mut bytes = vec![0xAAu8; 4];
        bytes.extend(1.5f32.to_le_bytes());
        bytes.extend(2.5f32.to_le_bytes());
        std::fs::write(dir.join("weights.bin"), &bytes).unwrap();

        let loaded = load_external(&external_tensor("weights.bin", 4), &dir).unwrap();
        assert!(!loaded.is_external());
        let array = tensor_to_array_f32(&loaded).unwrap();
        assert_eq!(array[0], 1.5);
        assert_eq!(array[1], 2.5);

        std::fs::remove_dir_all(&dir).ok();
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("onnx_ext_{}_{}", tag, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_range_beyond_file() {
        let dir = scratch_dir("short");
        std::fs::write(dir.join("weights.bin"), vec![0u8; 1024]).unwrap();

        // Declared shape implies about 4 TB
        let mut tensor = external_tensor("weights.bin", 0);
        tensor.dims = vec![1 << 20, 1 << 20];
        assert!(matches!(
            load_external(&tensor, &dir),
            Err(ImportError::InvalidValue(_))
        ));

        // Right size, but the offset runs past the end
        let tensor = external_tensor("weights.bin", 1020);
        assert!(matches!(
            load_external(&tensor, &dir),
            Err(ImportError::InvalidValue(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_byte_size_overflow() {
        let dir = scratch_dir("overflow");
        std::fs::write(dir.join("weights.bin"), vec![0u8; 8]).unwrap();

        let mut tensor = external_tensor("weights.bin", 0);
        tensor.dims = vec![1 << 31, 1 << 31, 1 << 31];
        assert!(load_external(&tensor, &dir).is_err());
        tensor.dims = vec![1 << 31, 1 << 31];
        assert!(matches!(
            load_external(&tensor, &dir),
            Err(ImportError::InvalidValue(_))
        ));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_location_must_not_escape() {
        let tensor = external_tensor("../secret.bin", 0);
        assert!(external_data_path(&tensor, Path::new("/models")).is_err());
        let tensor = external_tensor("/etc/passwd", 0);
        assert!(external_data_path(&tensor, Path::new("/models")).is_err());
    }

    #[test]
    fn test_missing_file() {
        let tensor = external_tensor("does_not_exist.bin", 0);
        assert!(matches!(
            load_external(&tensor, &std::env::temp_dir()),
            Err(ImportError::InvalidValue(_))
        ));
    }
}
