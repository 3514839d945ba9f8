//! 时间序列能力
//!
//! 时间函数（`AVERAGE(x, 1d)` 等）把第一个参数解析为 [`TemporalObject`]，
//! 把随后的带时间单位的参数绑定为 [`TimeWindow`]，再委托给能力对象计算。
//! 能力对象可以来自值环境（`Value::Temporal`），也可以按变量名从 [`TemporalSource`] 查找。
//!
//! [`TimeSeries`] 是内存实现：以最新数据点为"当前时刻"，
//! 窗口终点 = 当前时刻 + 终点偏移，窗口起点 = 终点 - |周期|。

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{ExpressionError, Result};
use crate::units::UnitValue;
use crate::value::Value;

/// 时间窗口：周期长度与可选的终点偏移
#[derive(Debug, Clone, PartialEq)]
pub struct TimeWindow {
    pub start: UnitValue,
    pub end: Option<UnitValue>,
}

impl TimeWindow {
    pub fn new(start: UnitValue, end: Option<UnitValue>) -> Self {
        Self { start, end }
    }

    /// 周期长度（取绝对值）
    pub fn length(&self) -> Result<TimeDelta> {
        period_duration(&self.start).map(|d| d.abs())
    }

    /// 终点相对当前时刻的偏移，未指定时为 0
    pub fn end_offset(&self) -> Result<TimeDelta> {
        match &self.end {
            Some(end) => period_duration(end),
            None => Ok(TimeDelta::zero()),
        }
    }

    /// 以 `now` 为当前时刻解析出绝对区间 `[start, end]`
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
        let end = now
            .checked_add_signed(self.end_offset()?)
            .ok_or_else(|| ExpressionError::Temporal(format!("窗口终点越界: {}", self)))?;
        let start = end
            .checked_sub_signed(self.length()?)
            .ok_or_else(|| ExpressionError::Temporal(format!("窗口起点越界: {}", self)))?;
        Ok((start, end))
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.end {
            Some(end) => write!(f, "{}, {}", self.start, end),
            None => write!(f, "{}", self.start),
        }
    }
}

fn period_duration(period: &UnitValue) -> Result<TimeDelta> {
    period
        .to_duration()
        .ok_or_else(|| ExpressionError::Temporal(format!("周期必须使用时间单位: {}", period)))
}

/// 时间序列能力对象
#[cfg_attr(test, mockall::automock)]
pub trait TemporalObject: Send + Sync {
    fn average(&self, window: &TimeWindow) -> Result<Value>;
    fn min(&self, window: &TimeWindow) -> Result<Value>;
    fn max(&self, window: &TimeWindow) -> Result<Value>;
    fn sum(&self, window: &TimeWindow) -> Result<Value>;
    fn count(&self, window: &TimeWindow) -> Result<Value>;
    fn all(&self, window: &TimeWindow) -> Result<Value>;
    fn any(&self, window: &TimeWindow) -> Result<Value>;
    fn delta(&self, window: &TimeWindow) -> Result<Value>;
    fn slope(&self, window: &TimeWindow) -> Result<Value>;
    fn standard_deviation(&self, window: &TimeWindow) -> Result<Value>;
    fn forecast(&self, window: &TimeWindow) -> Result<Value>;

    /// 数据是否覆盖窗口，以及覆盖窗口所需的历史长度
    fn is_in_range(&self, window: &TimeWindow) -> (bool, TimeDelta);
}

/// 按名称查找能力对象
pub trait TemporalSource: Send + Sync {
    fn temporal(&self, name: &str) -> Option<Arc<dyn TemporalObject>>;
}

/// 线程安全的能力对象注册表
#[derive(Default)]
pub struct TemporalRegistry {
    objects: DashMap<String, Arc<dyn TemporalObject>>,
}

impl TemporalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, object: Arc<dyn TemporalObject>) {
        let name = name.into();
        debug!(name = %name, "注册时间序列");
        self.objects.insert(name, object);
    }

    pub fn remove(&self, name: &str) -> Option<Arc<dyn TemporalObject>> {
        self.objects.remove(name).map(|(_, object)| object)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl TemporalSource for TemporalRegistry {
    fn temporal(&self, name: &str) -> Option<Arc<dyn TemporalObject>> {
        self.objects.get(name).map(|entry| Arc::clone(entry.value()))
    }
}

/// 内存时间序列，数据点按时间升序保存
#[derive(Debug, Clone, Default)]
pub struct TimeSeries {
    points: Vec<(DateTime<Utc>, f64)>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_points(points: impl IntoIterator<Item = (DateTime<Utc>, f64)>) -> Self {
        let mut points: Vec<_> = points.into_iter().collect();
        points.sort_by_key(|(at, _)| *at);
        Self { points }
    }

    /// 插入数据点，保持有序
    pub fn push(&mut self, at: DateTime<Utc>, value: f64) {
        let index = self.points.partition_point(|(t, _)| *t <= at);
        self.points.insert(index, (at, value));
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        self.points.first().map(|(at, _)| *at)
    }

    pub fn latest(&self) -> Option<DateTime<Utc>> {
        self.points.last().map(|(at, _)| *at)
    }

    fn now(&self) -> Result<DateTime<Utc>> {
        self.latest()
            .ok_or_else(|| ExpressionError::Temporal("时间序列为空".to_string()))
    }

    fn window_points(&self, window: &TimeWindow) -> Result<&[(DateTime<Utc>, f64)]> {
        let (start, end) = window.resolve(self.now()?)?;
        let from = self.points.partition_point(|(at, _)| *at < start);
        let to = self.points.partition_point(|(at, _)| *at <= end);
        Ok(&self.points[from..to.max(from)])
    }

    fn window_values(&self, window: &TimeWindow) -> Result<Vec<f64>> {
        Ok(self.window_points(window)?.iter().map(|(_, v)| *v).collect())
    }

    fn non_empty(&self, window: &TimeWindow) -> Result<Vec<f64>> {
        let values = self.window_values(window)?;
        if values.is_empty() {
            return Err(ExpressionError::Temporal(format!("窗口内没有数据: {}", window)));
        }
        Ok(values)
    }
}

/// 最小二乘拟合，x 为相对首点的秒数，返回 (每秒斜率, 截距, 首点时刻)
fn linear_fit(points: &[(DateTime<Utc>, f64)]) -> Option<(f64, f64, DateTime<Utc>)> {
    let origin = points.first()?.0;
    if points.len() < 2 {
        return None;
    }
    let xs: Vec<f64> = points
        .iter()
        .map(|(at, _)| (*at - origin).num_milliseconds() as f64 / 1000.0)
        .collect();
    let n = points.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = points.iter().map(|(_, v)| v).sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (x, (_, y)) in xs.iter().zip(points) {
        covariance += (x - mean_x) * (y - mean_y);
        variance += (x - mean_x) * (x - mean_x);
    }
    if variance == 0.0 {
        return None;
    }
    let slope = covariance / variance;
    Some((slope, mean_y - slope * mean_x, origin))
}

pub(crate) fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

impl TemporalObject for TimeSeries {
    fn average(&self, window: &TimeWindow) -> Result<Value> {
        let values = self.non_empty(window)?;
        Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
    }

    fn min(&self, window: &TimeWindow) -> Result<Value> {
        let values = self.non_empty(window)?;
        Ok(Value::Number(values.into_iter().fold(f64::INFINITY, f64::min)))
    }

    fn max(&self, window: &TimeWindow) -> Result<Value> {
        let values = self.non_empty(window)?;
        Ok(Value::Number(values.into_iter().fold(f64::NEG_INFINITY, f64::max)))
    }

    fn sum(&self, window: &TimeWindow) -> Result<Value> {
        Ok(Value::Number(self.window_values(window)?.iter().sum()))
    }

    fn count(&self, window: &TimeWindow) -> Result<Value> {
        Ok(Value::Number(self.window_values(window)?.len() as f64))
    }

    fn all(&self, window: &TimeWindow) -> Result<Value> {
        Ok(Value::Bool(self.window_values(window)?.iter().all(|v| *v > 0.0)))
    }

    fn any(&self, window: &TimeWindow) -> Result<Value> {
        Ok(Value::Bool(self.window_values(window)?.iter().any(|v| *v > 0.0)))
    }

    fn delta(&self, window: &TimeWindow) -> Result<Value> {
        let values = self.non_empty(window)?;
        let first = values[0];
        let last = values[values.len() - 1];
        Ok(Value::Number(last - first))
    }

    /// 每个周期单位上的变化率
    fn slope(&self, window: &TimeWindow) -> Result<Value> {
        let per_unit = window
            .start
            .unit
            .time_unit()
            .map(|unit| unit.seconds())
            .unwrap_or(1.0);
        let slope = linear_fit(self.window_points(window)?)
            .map(|(per_second, _, _)| per_second * per_unit)
            .unwrap_or(0.0);
        Ok(Value::Number(slope))
    }

    fn standard_deviation(&self, window: &TimeWindow) -> Result<Value> {
        Ok(Value::Number(population_std(&self.non_empty(window)?)))
    }

    /// 在最近一个周期上拟合直线，外推到当前时刻之后 |终点偏移| 处
    fn forecast(&self, window: &TimeWindow) -> Result<Value> {
        let now = self.now()?;
        let history = TimeWindow::new(window.start.clone(), None);
        let points = self.window_points(&history)?;
        let horizon = now
            .checked_add_signed(window.end_offset()?.abs())
            .ok_or_else(|| ExpressionError::Temporal(format!("预测时刻越界: {}", window)))?;
        match linear_fit(points) {
            Some((slope, intercept, origin)) => {
                let x = (horizon - origin).num_milliseconds() as f64 / 1000.0;
                Ok(Value::Number(intercept + slope * x))
            }
            None => points
                .last()
                .map(|(_, v)| Value::Number(*v))
                .ok_or_else(|| ExpressionError::Temporal(format!("窗口内没有数据: {}", window))),
        }
    }

    fn is_in_range(&self, window: &TimeWindow) -> (bool, TimeDelta) {
        let length = window.length().unwrap_or_else(|_| TimeDelta::zero());
        let offset = window.end_offset().unwrap_or_else(|_| TimeDelta::zero());
        let required = length - offset.min(TimeDelta::zero());
        match (self.earliest(), self.latest()) {
            (Some(earliest), Some(latest)) => (latest - earliest >= required, required),
            _ => (false, required),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;
    use chrono::TimeZone;

    fn hourly(values: &[f64]) -> TimeSeries {
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        TimeSeries::from_points(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (origin + TimeDelta::hours(i as i64), *v)),
        )
    }

    fn hours(n: f64) -> UnitValue {
        UnitValue::new(n, Unit::get("h"))
    }

    #[test]
    fn test_window_resolve() {
        let now = Utc.with_ymd_and_hms(2024, 1, 5, 0, 0, 0).unwrap();
        let window = TimeWindow::new(
            UnitValue::new(1.0, Unit::get("d")),
            Some(UnitValue::new(-2.0, Unit::get("d"))),
        );
        let (start, end) = window.resolve(now).unwrap();
        assert_eq!(end, Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap());
        assert_eq!(start, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_non_time_period_rejected() {
        let window = TimeWindow::new(UnitValue::new(1.0, Unit::get("W")), None);
        assert!(matches!(window.length(), Err(ExpressionError::Temporal(_))));
    }

    #[test]
    fn test_aggregates_over_window() {
        // 0h..5h 共 6 个点，最近 2 小时窗口包含 3,4,5 时刻
        let series = hourly(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let window = TimeWindow::new(hours(2.0), None);

        assert_eq!(series.average(&window).unwrap(), Value::Number(5.0));
        assert_eq!(series.sum(&window).unwrap(), Value::Number(15.0));
        assert_eq!(series.min(&window).unwrap(), Value::Number(4.0));
        assert_eq!(series.max(&window).unwrap(), Value::Number(6.0));
        assert_eq!(series.count(&window).unwrap(), Value::Number(3.0));
        assert_eq!(series.delta(&window).unwrap(), Value::Number(2.0));
        assert_eq!(series.all(&window).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_window_with_end_offset() {
        let series = hourly(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        // 以 2 小时前为终点的 1 小时窗口：2h、3h 两个点
        let window = TimeWindow::new(hours(1.0), Some(hours(-2.0)));
        assert_eq!(series.average(&window).unwrap(), Value::Number(3.5));
    }

    #[test]
    fn test_slope_per_period_unit() {
        let series = hourly(&[0.0, 2.0, 4.0, 6.0]);
        let per_hour = series.slope(&TimeWindow::new(hours(3.0), None)).unwrap();
        assert!((per_hour.as_f64().unwrap() - 2.0).abs() < 1e-9);

        let per_day = series
            .slope(&TimeWindow::new(UnitValue::new(1.0, Unit::get("d")), None))
            .unwrap();
        assert!((per_day.as_f64().unwrap() - 48.0).abs() < 1e-9);
    }

    #[test]
    fn test_forecast_extrapolates() {
        let series = hourly(&[0.0, 1.0, 2.0, 3.0]);
        let window = TimeWindow::new(hours(3.0), Some(hours(2.0)));
        let Value::Number(predicted) = series.forecast(&window).unwrap() else {
            panic!("forecast must be numeric");
        };
        assert!((predicted - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_standard_deviation() {
        let series = hourly(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        let window = TimeWindow::new(hours(10.0), None);
        assert_eq!(series.standard_deviation(&window).unwrap(), Value::Number(2.0));
    }

    #[test]
    fn test_is_in_range() {
        let series = hourly(&[1.0, 2.0, 3.0, 4.0]);
        let (ok, required) = series.is_in_range(&TimeWindow::new(hours(3.0), None));
        assert!(ok);
        assert_eq!(required, TimeDelta::hours(3));

        let (ok, required) = series.is_in_range(&TimeWindow::new(hours(2.0), Some(hours(-2.0))));
        assert!(!ok);
        assert_eq!(required, TimeDelta::hours(4));

        let (ok, _) = TimeSeries::new().is_in_range(&TimeWindow::new(hours(1.0), None));
        assert!(!ok);
    }

    #[test]
    fn test_empty_window_errors() {
        let series = hourly(&[1.0]);
        let window = TimeWindow::new(hours(1.0), Some(hours(-5.0)));
        assert!(series.average(&window).is_err());
        assert_eq!(series.count(&window).unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_push_keeps_order() {
        let mut series = hourly(&[1.0, 3.0]);
        let origin = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        series.push(origin + TimeDelta::minutes(30), 2.0);
        assert_eq!(series.len(), 3);
        assert_eq!(series.latest(), Some(origin + TimeDelta::hours(1)));
    }

    #[test]
    fn test_registry_lookup() {
        let registry = TemporalRegistry::new();
        assert!(registry.is_empty());
        registry.register("cost", Arc::new(hourly(&[1.0])));
        assert!(registry.temporal("cost").is_some());
        assert!(registry.temporal("other").is_none());
        assert!(registry.remove("cost").is_some());
        assert!(registry.is_empty());
    }
}
