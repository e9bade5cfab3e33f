//! 断言求值
//!
//! 对变量存储中的值做固定集合的比较: equal / includes / greater / smaller。
//! 类型转换失败与比较不成立是两类不同的错误。

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use crate::variables::VariableStore;

/// 断言错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AssertionError {
    #[error("变量 '{0}' 不存在")]
    VariableNotFound(String),

    #[error("不支持的比较运算符: {0}")]
    UnknownOperator(String),

    #[error("不支持的值类型: {0}")]
    UnknownValueType(String),

    #[error("{side} '{value}' 无法转换为 {value_type}")]
    Conversion {
        side: Side,
        value: String,
        value_type: ValueType,
    },

    #[error("运算符 {0} 只支持 int 或 float 类型")]
    NumericTypeRequired(Operator),

    #[error("{0}")]
    Mismatch(String),
}

type Result<T> = std::result::Result<T, AssertionError>;

/// 比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Equal,
    Includes,
    Greater,
    Smaller,
}

impl FromStr for Operator {
    type Err = AssertionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "equal" => Ok(Operator::Equal),
            "includes" => Ok(Operator::Includes),
            "greater" => Ok(Operator::Greater),
            "smaller" => Ok(Operator::Smaller),
            _ => Err(AssertionError::UnknownOperator(s.to_string())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Equal => "equal",
            Operator::Includes => "includes",
            Operator::Greater => "greater",
            Operator::Smaller => "smaller",
        };
        f.write_str(name)
    }
}

/// 比较时使用的值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueType {
    Int,
    Float,
    #[default]
    String,
}

impl FromStr for ValueType {
    type Err = AssertionError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "int" => Ok(ValueType::Int),
            "float" => Ok(ValueType::Float),
            "" | "string" => Ok(ValueType::String),
            _ => Err(AssertionError::UnknownValueType(s.to_string())),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::String => "string",
        };
        f.write_str(name)
    }
}

/// 转换失败的一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Actual,
    Expected,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Actual => f.write_str("实际值"),
            Side::Expected => f.write_str("期望值"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
enum Number {
    Int(i64),
    Float(f64),
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(v) => write!(f, "{}", v),
            Number::Float(v) => write!(f, "{}", v),
        }
    }
}

// 实际值与期望值走同一个解析函数
fn parse_number(raw: &str, value_type: ValueType, side: Side) -> Result<Number> {
    let text = raw.trim();
    let parsed = match value_type {
        ValueType::Int => text.parse::<i64>().ok().map(Number::Int),
        ValueType::Float => text.parse::<f64>().ok().map(Number::Float),
        ValueType::String => None,
    };

    parsed.ok_or_else(|| AssertionError::Conversion {
        side,
        value: raw.to_string(),
        value_type,
    })
}

fn parse_pair(actual: &str, expected: &str, value_type: ValueType) -> Result<(Number, Number)> {
    Ok((
        parse_number(actual, value_type, Side::Actual)?,
        parse_number(expected, value_type, Side::Expected)?,
    ))
}

/// 求值单个断言
pub fn evaluate(
    actual: &str,
    operator: Operator,
    expected: &str,
    value_type: ValueType,
) -> Result<()> {
    match operator {
        Operator::Includes => {
            if actual.contains(expected) {
                Ok(())
            } else {
                Err(AssertionError::Mismatch(format!(
                    "'{}' 不包含 '{}'",
                    actual, expected
                )))
            }
        }
        Operator::Equal => match value_type {
            ValueType::String => {
                if actual == expected {
                    Ok(())
                } else {
                    Err(AssertionError::Mismatch(format!(
                        "'{}' 不等于 '{}'",
                        actual, expected
                    )))
                }
            }
            _ => {
                let (a, e) = parse_pair(actual, expected, value_type)?;
                if a == e {
                    Ok(())
                } else {
                    Err(AssertionError::Mismatch(format!("{} 不等于 {}", a, e)))
                }
            }
        },
        Operator::Greater | Operator::Smaller => {
            if value_type == ValueType::String {
                return Err(AssertionError::NumericTypeRequired(operator));
            }

            let (a, e) = parse_pair(actual, expected, value_type)?;
            let holds = match operator {
                Operator::Greater => a > e,
                _ => a < e,
            };

            if holds {
                Ok(())
            } else {
                let relation = if operator == Operator::Greater {
                    "大于"
                } else {
                    "小于"
                };
                Err(AssertionError::Mismatch(format!(
                    "{} 不{} {}",
                    a, relation, e
                )))
            }
        }
    }
}

/// 查找变量并求值断言
pub fn assert_variable(
    store: &VariableStore,
    variable: &str,
    operator: Operator,
    expected: &str,
    value_type: ValueType,
) -> Result<()> {
    let actual = store
        .get(variable)
        .ok_or_else(|| AssertionError::VariableNotFound(variable.to_string()))?;
    evaluate(actual, operator, expected, value_type)
}
