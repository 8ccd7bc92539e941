use anyhow::{bail, Result};

/// Data types supported by the database
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Varchar = 4,
}

impl DataType {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            4 => Ok(DataType::Varchar),
            _ => bail!("Unknown data type: {}", value),
        }
    }
}

/// Values that can be stored in the database
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    String(String),
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::String(_) => Some(DataType::Varchar),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// SQL truthiness: only a non-null TRUE passes a predicate.
    pub fn is_true(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }

    /// Total-order comparison of same-typed values; NULL sorts first.
    /// Cross-typed comparison is a caller bug and returns None.
    pub fn compare(&self, other: &Value) -> Option<std::cmp::Ordering> {
        use std::cmp::Ordering;
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Null, _) => Some(Ordering::Less),
            (_, Value::Null) => Some(Ordering::Greater),
            (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int32(i) => write!(f, "{}", i),
            Value::String(s) => write!(f, "{}", s),
        }
    }
}

/// Serialize a vector of values into self-describing bytes
pub fn serialize_values(values: &[Value]) -> Vec<u8> {
    let mut data = Vec::new();

    data.extend_from_slice(&(values.len() as u32).to_le_bytes());

    for value in values {
        match value {
            Value::Null => {
                data.push(0);
            }
            Value::Boolean(b) => {
                data.push(1);
                data.push(if *b { 1 } else { 0 });
            }
            Value::Int32(i) => {
                data.push(2);
                data.extend_from_slice(&i.to_le_bytes());
            }
            Value::String(s) => {
                data.push(4);
                let bytes = s.as_bytes();
                data.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
                data.extend_from_slice(bytes);
            }
        }
    }

    data
}

/// Deserialize bytes into a vector of values. Trailing bytes after the
/// described values are ignored.
pub fn deserialize_values(data: &[u8]) -> Result<Vec<Value>> {
    if data.len() < 4 {
        bail!("Invalid value data: too short");
    }

    let mut offset = 0;
    let count = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    offset += 4;

    let mut values = Vec::with_capacity(count);

    for _ in 0..count {
        if offset >= data.len() {
            bail!("Invalid value data: unexpected end");
        }

        let type_tag = data[offset];
        offset += 1;

        match type_tag {
            0 => {
                values.push(Value::Null);
            }
            1 => {
                if offset >= data.len() {
                    bail!("Invalid boolean value: no data");
                }
                values.push(Value::Boolean(data[offset] != 0));
                offset += 1;
            }
            2 => {
                if offset + 4 > data.len() {
                    bail!("Invalid int32 value: not enough data");
                }
                let value = i32::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]);
                values.push(Value::Int32(value));
                offset += 4;
            }
            4 => {
                if offset + 4 > data.len() {
                    bail!("Invalid string value: no length");
                }
                let len = u32::from_le_bytes([
                    data[offset],
                    data[offset + 1],
                    data[offset + 2],
                    data[offset + 3],
                ]) as usize;
                offset += 4;

                if offset + len > data.len() {
                    bail!("Invalid string value: string too long");
                }
                let s = String::from_utf8(data[offset..offset + len].to_vec())?;
                values.push(Value::String(s));
                offset += len;
            }
            _ => bail!("Unknown value type tag: {}", type_tag),
        }
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_roundtrip() -> Result<()> {
        let values = vec![
            Value::Int32(42),
            Value::String("hello".to_string()),
            Value::Boolean(true),
            Value::Null,
        ];
        let data = serialize_values(&values);
        let back = deserialize_values(&data)?;
        assert_eq!(values, back);
        Ok(())
    }

    #[test]
    fn test_deserialize_ignores_trailing_bytes() -> Result<()> {
        let values = vec![Value::Int32(7)];
        let mut data = serialize_values(&values);
        data.extend_from_slice(&[0xAA; 16]);
        let back = deserialize_values(&data)?;
        assert_eq!(values, back);
        Ok(())
    }

    #[test]
    fn test_compare() {
        use std::cmp::Ordering;
        assert_eq!(
            Value::Int32(1).compare(&Value::Int32(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Null.compare(&Value::Int32(2)),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::String("b".into()).compare(&Value::String("a".into())),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Int32(1).compare(&Value::Boolean(true)), None);
    }

    #[test]
    fn test_truncated_data_errors() {
        let values = vec![Value::String("abcdef".to_string())];
        let data = serialize_values(&values);
        assert!(deserialize_values(&data[..data.len() - 2]).is_err());
        assert!(deserialize_values(&[]).is_err());
    }
}
