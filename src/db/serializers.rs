//! Concrete [`StorageSerde`] implementations for the primitive and tuple types used as table
//! keys and values throughout the crate.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use integer_encoding::{VarIntReader, VarIntWriter};

use super::serialization::{StorageSerde, StorageSerdeError};

macro_rules! auto_storage_serde {
    () => {};
    // Tuples - two elements.
    (($ty0:ty, $ty1:ty) ; $($rest:tt)*) => {
        impl StorageSerde for ($ty0, $ty1) {
            fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
                self.0.serialize_into(res)?;
                self.1.serialize_into(res)
            }
            fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
                Some((
                    <$ty0>::deserialize_from(bytes)?,
                    <$ty1>::deserialize_from(bytes)?,
                ))
            }
        }
        auto_storage_serde!($($rest)*);
    };
    // Tuples - three elements.
    (($ty0:ty, $ty1:ty, $ty2:ty) ; $($rest:tt)*) => {
        impl StorageSerde for ($ty0, $ty1, $ty2) {
            fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
                self.0.serialize_into(res)?;
                self.1.serialize_into(res)?;
                self.2.serialize_into(res)
            }
            fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
                Some((
                    <$ty0>::deserialize_from(bytes)?,
                    <$ty1>::deserialize_from(bytes)?,
                    <$ty2>::deserialize_from(bytes)?,
                ))
            }
        }
        auto_storage_serde!($($rest)*);
    };
    // Tuples - four elements. The arc table keys on (file_id, context_id, start_line, end_line).
    (($ty0:ty, $ty1:ty, $ty2:ty, $ty3:ty) ; $($rest:tt)*) => {
        impl StorageSerde for ($ty0, $ty1, $ty2, $ty3) {
            fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
                self.0.serialize_into(res)?;
                self.1.serialize_into(res)?;
                self.2.serialize_into(res)?;
                self.3.serialize_into(res)
            }
            fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
                Some((
                    <$ty0>::deserialize_from(bytes)?,
                    <$ty1>::deserialize_from(bytes)?,
                    <$ty2>::deserialize_from(bytes)?,
                    <$ty3>::deserialize_from(bytes)?,
                ))
            }
        }
        auto_storage_serde!($($rest)*);
    };
    // Binary, big-endian encoded fixed-width numerics. Chosen (over little-endian) so that the
    // byte order of a key matches its numeric order, which lower_bound()/cursor scans rely on.
    // Only sound for unsigned types as-is: MDBX compares keys as unsigned byte strings, so a
    // signed type needs the bias encoding below instead of this arm.
    (binary($name:ident, $read:ident, $write:ident); $($rest:tt)*) => {
        impl StorageSerde for $name {
            fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
                Ok(WriteBytesExt::$write::<BigEndian>(res, *self)?)
            }

            fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
                ReadBytesExt::$read::<BigEndian>(bytes).ok()
            }
        }
        auto_storage_serde!($($rest)*);
    };
}
pub(crate) use auto_storage_serde;

impl StorageSerde for bool {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        u8::from(*self).serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        Some(u8::deserialize_from(bytes)? != 0)
    }
}

impl StorageSerde for u8 {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        Ok(res.write_u8(*self)?)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        bytes.read_u8().ok()
    }
}

impl StorageSerde for usize {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        (*self as u64).serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        usize::try_from(u64::deserialize_from(bytes)?).ok()
    }
}

impl StorageSerde for String {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        self.as_bytes().to_vec().serialize_into(res)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        Self::from_utf8(Vec::deserialize_from(bytes)?).ok()
    }
}

impl<T: StorageSerde> StorageSerde for Option<T> {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        match self {
            Some(value) => {
                res.write_all(&[1])?;
                value.serialize_into(res)
            }
            None => Ok(res.write_all(&[0])?),
        }
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        let mut exists = [0u8; 1];
        bytes.read_exact(&mut exists).ok()?;
        match exists[0] {
            0 => Some(None),
            1 => Some(Some(T::deserialize_from(bytes)?)),
            _ => None,
        }
    }
}

impl<T: StorageSerde> StorageSerde for Vec<T> {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        res.write_varint(self.len())?;
        for item in self {
            item.serialize_into(res)?;
        }
        Ok(())
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        let n: usize = bytes.read_varint().ok()?;
        let mut res = Vec::with_capacity(n);
        for _ in 0..n {
            res.push(T::deserialize_from(bytes)?);
        }
        Some(res)
    }
}

impl StorageSerde for () {
    fn serialize_into(&self, _res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        Ok(())
    }

    fn deserialize_from(_bytes: &mut impl std::io::Read) -> Option<Self> {
        Some(())
    }
}

// MDBX compares keys byte-for-byte as unsigned strings. A plain two's-complement big-endian
// encoding would therefore sort i64::MIN (0x80...) after every non-negative value (0x00...-
// 0x7F...); XORing the sign bit before encoding ("bias encoding") maps the signed numeric order
// onto unsigned byte order, which is what lower_bound()/cursor range scans over (fromno, tono)
// rely on.
impl StorageSerde for i64 {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        let biased = (*self as u64) ^ (1u64 << 63);
        Ok(WriteBytesExt::write_u64::<BigEndian>(res, biased)?)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        let biased = ReadBytesExt::read_u64::<BigEndian>(bytes).ok()?;
        Some((biased ^ (1u64 << 63)) as i64)
    }
}

impl StorageSerde for i32 {
    fn serialize_into(&self, res: &mut impl std::io::Write) -> Result<(), StorageSerdeError> {
        let biased = (*self as u32) ^ (1u32 << 31);
        Ok(WriteBytesExt::write_u32::<BigEndian>(res, biased)?)
    }

    fn deserialize_from(bytes: &mut impl std::io::Read) -> Option<Self> {
        let biased = ReadBytesExt::read_u32::<BigEndian>(bytes).ok()?;
        Some((biased ^ (1u32 << 31)) as i32)
    }
}

auto_storage_serde! {
    binary(u32, read_u32, write_u32);
    binary(u64, read_u64, write_u64);
    (u32, u32);
    (u32, String);
    (String, u32);
    (u32, u32, i64, i64);
}
