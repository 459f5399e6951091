/// How the row list renders a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Bitmap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub label: &'static str,
    pub kind: FieldKind,
}

impl Field {
    const fn text(name: &'static str, label: &'static str) -> Self {
        Self {
            name,
            label,
            kind: FieldKind::Text,
        }
    }

    pub fn lookup(name: &str) -> Option<&'static Field> {
        DISPLAYED_FIELDS.iter().find(|field| field.name == name)
    }
}

/// Columns of the image list, in display order.
pub const DISPLAYED_FIELDS: &[Field] = &[
    Field::text("status_display", ""),
    Field {
        name: "preview",
        label: "",
        kind: FieldKind::Bitmap,
    },
    Field::text("input_file_display", "Input Image"),
    Field::text("input_size_display", "Input Size"),
    Field::text("separator", ""),
    Field::text("output_file_display", "Output Image"),
    Field::text("output_format_display", "Format"),
    Field::text("output_size_display", "Output Size"),
];
