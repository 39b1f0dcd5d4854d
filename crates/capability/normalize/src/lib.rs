//! 标签值规范化：量程转换与显示格式。
//!
//! 采集引擎在驱动读成功后对每个有值的标签调用 [`ValueConverter::on_read`]，
//! 在驱动写之前对待写标签的副本调用 [`ValueConverter::on_write`]。

use domain::{Tag, TagValue};

/// 读写两个方向的值转换钩子。
pub trait ValueConverter: Send + Sync {
    /// 原始值 -> 工程值
    fn on_read(&self, tag: &mut Tag);
    /// 工程值 -> 原始值
    fn on_write(&self, tag: &mut Tag);
}

/// 线性量程转换 + 显示格式。
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearConverter;

impl ValueConverter for LinearConverter {
    fn on_read(&self, tag: &mut Tag) {
        read_convert(tag);
        format_value(tag);
    }

    fn on_write(&self, tag: &mut Tag) {
        write_convert(tag);
    }
}

/// 不做任何转换（驱动已输出工程值时使用）。
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl ValueConverter for PassthroughConverter {
    fn on_read(&self, _tag: &mut Tag) {}

    fn on_write(&self, _tag: &mut Tag) {}
}

/// 读方向量程转换，结果类型为 [`Tag::engineering_type`]。
pub fn read_convert(tag: &mut Tag) {
    if !tag.data_type.is_number() {
        return;
    }
    let Some(conversion) = tag.conversion.filter(|c| c.is_active()) else {
        return;
    };
    let Some(raw) = tag.value.as_ref().and_then(TagValue::as_f64) else {
        return;
    };

    let out = (raw - conversion.raw_lo) / (conversion.raw_hi - conversion.raw_lo)
        * (conversion.eng_hi - conversion.eng_lo)
        + conversion.eng_lo;
    if let Some(value) = TagValue::from_f64(tag.engineering_type(), out) {
        tag.value = Some(value);
    }
}

/// 写方向量程转换，结果类型为原始 `data_type`。
pub fn write_convert(tag: &mut Tag) {
    if !tag.data_type.is_number() {
        return;
    }
    let Some(conversion) = tag.conversion.filter(|c| c.is_active()) else {
        return;
    };
    let Some(eng) = tag.value.as_ref().and_then(TagValue::as_f64) else {
        return;
    };

    let out = (eng - conversion.eng_lo) / (conversion.eng_hi - conversion.eng_lo)
        * (conversion.raw_hi - conversion.raw_lo)
        + conversion.raw_lo;
    if let Some(value) = TagValue::from_f64(tag.data_type, out) {
        tag.value = Some(value);
    }
}

/// 按显示格式对浮点值取整，如 `.2f` / `%.3f` / `2`。
pub fn format_value(tag: &mut Tag) {
    let Some(precision) = tag.format.as_deref().and_then(parse_precision) else {
        return;
    };
    let formatted = match tag.value.as_ref() {
        Some(TagValue::F32(v)) => format!("{:.*}", precision, v)
            .parse::<f32>()
            .ok()
            .map(TagValue::F32),
        Some(TagValue::F64(v)) => format!("{:.*}", precision, v)
            .parse::<f64>()
            .ok()
            .map(TagValue::F64),
        _ => None,
    };
    if let Some(value) = formatted {
        tag.value = Some(value);
    }
}

fn parse_precision(format: &str) -> Option<usize> {
    let digits = format.trim().trim_start_matches('%').trim_start_matches('.');
    let digits = digits
        .strip_suffix('f')
        .or_else(|| digits.strip_suffix('F'))
        .unwrap_or(digits);
    if digits.is_empty() {
        return None;
    }
    digits.parse::<usize>().ok()
}
