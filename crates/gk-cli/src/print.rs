use gk_format::{ScalarValue, ValueVisitor};

/// Prints metadata values to stdout: scalars bare, arrays bracketed with
/// comma-separated elements, elided past a configurable cap.
pub struct PrintVisitor {
    max_array_items: u64,
}

impl PrintVisitor {
    /// A `max_array_items` of 0 prints arrays in full.
    pub fn new(max_array_items: u64) -> PrintVisitor {
        PrintVisitor { max_array_items }
    }
}

impl ValueVisitor for PrintVisitor {
    fn scalar(&mut self, value: ScalarValue<'_>, in_array: u64, array_len: u64) {
        if self.max_array_items != 0 && in_array > self.max_array_items {
            if in_array - 1 == self.max_array_items {
                print!("... {} more items", array_len - in_array + 1);
            }
            return;
        }
        match value {
            ScalarValue::U8(v) => print!("{}", v),
            ScalarValue::I8(v) => print!("{}", v),
            ScalarValue::U16(v) => print!("{}", v),
            ScalarValue::I16(v) => print!("{}", v),
            ScalarValue::U32(v) => print!("{}", v),
            ScalarValue::I32(v) => print!("{}", v),
            ScalarValue::F32(v) => print!("{:.6}", v),
            ScalarValue::Bool(v) => print!("{}", v),
            ScalarValue::InvalidBool(v) => print!("Invalid boolean value {}", v),
            ScalarValue::Str(s) => print!("{}", s),
            ScalarValue::U64(v) => print!("{}", v),
            ScalarValue::I64(v) => print!("{}", v),
            ScalarValue::F64(v) => print!("{:.6}", v),
        }
        if in_array != 0 && in_array != array_len {
            print!(", ");
        }
    }

    fn array_start(&mut self, _len: u64) {
        print!("[");
    }

    fn array_end(&mut self, _len: u64) {
        print!("]");
    }
}
