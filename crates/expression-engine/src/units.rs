//! 物理单位与时间单位
//!
//! 单位以规范名称为身份，每个单位带有一组大小写敏感的别名。
//! 名称表是开放的：`UnitRegistry::get` 遇到未知名称时会创建并缓存新的通用单位，
//! 因此查找永远不会失败；`try_get` 则只查不建。
//!
//! 进程级默认注册表通过 [`UnitRegistry::global`] 懒加载，
//! 需要隔离的场景（测试、多租户）可以自行构造注册表并注入解析器。

use chrono::{
    DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike,
};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

/// 时间单位种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

impl TimeUnit {
    /// 单位对应的秒数，月按 30 天折算
    pub fn seconds(&self) -> f64 {
        match self {
            Self::Second => 1.0,
            Self::Minute => 60.0,
            Self::Hour => 3_600.0,
            Self::Day => 86_400.0,
            Self::Week => 604_800.0,
            Self::Month => 2_592_000.0,
        }
    }
}

/// 内置单位：(规范名, 时间种类, 别名)
const BUILTIN_UNITS: &[(&str, Option<TimeUnit>, &[&str])] = &[
    ("s", Some(TimeUnit::Second), &["sec", "secs", "second", "seconds"]),
    ("min", Some(TimeUnit::Minute), &["mins", "minute", "minutes"]),
    ("h", Some(TimeUnit::Hour), &["hr", "hrs", "hour", "hours"]),
    ("d", Some(TimeUnit::Day), &["day", "days"]),
    ("week", Some(TimeUnit::Week), &["w", "wk", "wks", "weeks"]),
    ("month", Some(TimeUnit::Month), &["mo", "months"]),
    ("degC", None, &["C", "°C", "celsius", "degrees-celsius"]),
    ("degF", None, &["F", "°F", "fahrenheit", "degrees-fahrenheit"]),
    ("%", None, &["percent"]),
    ("W", None, &["watt", "watts"]),
    ("kW", None, &["kilowatt", "kilowatts"]),
    ("kWh", None, &["kilowatt-hour", "kilowatt-hours"]),
    ("Pa", None, &["pascal", "pascals"]),
    ("in.wc", None, &["inH2O"]),
];

#[derive(Debug)]
struct UnitDef {
    name: String,
    aliases: Vec<String>,
    time: Option<TimeUnit>,
}

/// 单位句柄，克隆开销为一次引用计数
#[derive(Debug, Clone)]
pub struct Unit(Arc<UnitDef>);

impl Unit {
    fn new(name: &str, time: Option<TimeUnit>, aliases: &[&str]) -> Self {
        Self(Arc::new(UnitDef {
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            time,
        }))
    }

    /// 从默认注册表获取单位，未知名称会被创建
    pub fn get(name: &str) -> Unit {
        UnitRegistry::global().get(name)
    }

    /// 从默认注册表查找单位，未知名称返回 None
    pub fn try_get(name: &str) -> Option<Unit> {
        UnitRegistry::global().try_get(name)
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn aliases(&self) -> &[String] {
        &self.0.aliases
    }

    pub fn time_unit(&self) -> Option<TimeUnit> {
        self.0.time
    }

    pub fn is_time(&self) -> bool {
        self.0.time.is_some()
    }

    /// 将时间对齐到该单位的自然边界，再偏移 `offset` 个单位
    ///
    /// 边界在锚点所在时区的本地时间上计算：月取月初，周取周一零点，
    /// 日取零点，小时和分钟取整点，秒截掉小数部分。通用单位返回 None。
    pub fn snap_to_time<Tz: TimeZone>(
        &self,
        offset: i64,
        anchor: &DateTime<Tz>,
    ) -> Option<DateTime<Tz>> {
        let local = anchor.naive_local();
        let date = local.date();
        let snapped: NaiveDateTime = match self.time_unit()? {
            TimeUnit::Second => {
                local.with_nanosecond(0)? + TimeDelta::try_seconds(offset)?
            }
            TimeUnit::Minute => {
                date.and_hms_opt(local.hour(), local.minute(), 0)?
                    + TimeDelta::try_minutes(offset)?
            }
            TimeUnit::Hour => {
                date.and_hms_opt(local.hour(), 0, 0)? + TimeDelta::try_hours(offset)?
            }
            TimeUnit::Day => shift_days(date, offset)?.and_hms_opt(0, 0, 0)?,
            TimeUnit::Week => {
                let monday =
                    date.checked_sub_days(Days::new(date.weekday().num_days_from_monday().into()))?;
                shift_days(monday, offset.checked_mul(7)?)?.and_hms_opt(0, 0, 0)?
            }
            TimeUnit::Month => {
                let first = NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?;
                let months = Months::new(u32::try_from(offset.unsigned_abs()).ok()?);
                let shifted = if offset >= 0 {
                    first.checked_add_months(months)?
                } else {
                    first.checked_sub_months(months)?
                };
                shifted.and_hms_opt(0, 0, 0)?
            }
        };
        anchor.timezone().from_local_datetime(&snapped).earliest()
    }
}

fn shift_days(date: NaiveDate, offset: i64) -> Option<NaiveDate> {
    let days = Days::new(offset.unsigned_abs());
    if offset >= 0 {
        date.checked_add_days(days)
    } else {
        date.checked_sub_days(days)
    }
}

impl PartialEq for Unit {
    fn eq(&self, other: &Self) -> bool {
        self.name() == other.name()
    }
}

impl Eq for Unit {}

impl Hash for Unit {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name().hash(state);
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Unit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Unit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Unit::get(&name))
    }
}

/// 单位注册表
///
/// 键为规范名与所有别名，值指向同一个单位句柄。
pub struct UnitRegistry {
    units: DashMap<String, Unit>,
}

impl UnitRegistry {
    /// 创建带内置单位的注册表
    pub fn new() -> Self {
        let units = DashMap::new();
        for (name, time, aliases) in BUILTIN_UNITS {
            let unit = Unit::new(name, *time, aliases);
            units.insert(name.to_string(), unit.clone());
            for alias in aliases.iter() {
                units.insert(alias.to_string(), unit.clone());
            }
        }
        Self { units }
    }

    /// 进程级默认注册表，首次访问时初始化
    pub fn global() -> &'static UnitRegistry {
        static GLOBAL: OnceLock<UnitRegistry> = OnceLock::new();
        GLOBAL.get_or_init(UnitRegistry::new)
    }

    /// 获取单位，未知名称作为新的通用单位注册
    pub fn get(&self, name: &str) -> Unit {
        if let Some(unit) = self.try_get(name) {
            return unit;
        }
        self.units
            .entry(name.to_string())
            .or_insert_with(|| Unit::new(name, None, &[]))
            .value()
            .clone()
    }

    /// 查找单位，不产生副作用
    pub fn try_get(&self, name: &str) -> Option<Unit> {
        self.units.get(name).map(|u| u.value().clone())
    }

    /// 已注册的名称数（含别名）
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Default for UnitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 带单位的数值，用作时间函数的周期参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitValue {
    pub value: f64,
    pub unit: Unit,
}

impl UnitValue {
    pub fn new(value: f64, unit: Unit) -> Self {
        Self { value, unit }
    }

    /// 时间单位换算成时长，通用单位返回 None
    pub fn to_duration(&self) -> Option<TimeDelta> {
        let seconds = self.value * self.unit.time_unit()?.seconds();
        if !seconds.is_finite() {
            return None;
        }
        TimeDelta::try_milliseconds((seconds * 1000.0).round() as i64)
    }

    pub fn negated(&self) -> Self {
        Self::new(-self.value, self.unit.clone())
    }
}

impl fmt::Display for UnitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.value, self.unit)
    }
}
