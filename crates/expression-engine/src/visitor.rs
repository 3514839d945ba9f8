//! 访问者框架
//!
//! 两套入口：
//!
//! - [`Visitor`]：任意结果类型的遍历（求值、单位推断、序列化、方程求解），
//!   每个节点变体对应一个方法，由 [`Expr::accept`] 分派。
//! - [`Rewriter`]：树到树的改写，所有方法默认做恒等遍历（用改写后的子节点重建节点，
//!   并保留单位标签），具体改写器只需覆盖关心的变体。由 [`Expr::rewrite`] 分派。
//!
//! `walk_*` 函数就是默认实现本身，覆盖方法时可以先调用它们完成子节点改写。

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::expr::{Expr, ExprKind, Variable};
use crate::operators::BinaryOperator;

pub trait Visitor {
    type Output;

    fn visit_number(&mut self, expr: &Expr, value: f64) -> Self::Output;
    fn visit_string(&mut self, expr: &Expr, value: &str) -> Self::Output;
    fn visit_bool(&mut self, expr: &Expr, value: bool) -> Self::Output;
    fn visit_date(&mut self, expr: &Expr, value: &DateTime<Utc>) -> Self::Output;
    fn visit_variable(&mut self, expr: &Expr, variable: &Variable) -> Self::Output;
    fn visit_negate(&mut self, expr: &Expr, operand: &Expr) -> Self::Output;
    fn visit_not(&mut self, expr: &Expr, operand: &Expr) -> Self::Output;
    fn visit_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Self::Output;
    fn visit_if(
        &mut self,
        expr: &Expr,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> Self::Output;
    fn visit_set(&mut self, expr: &Expr, items: &[Expr]) -> Self::Output;
    fn visit_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Self::Output;
    fn visit_property(&mut self, expr: &Expr, target: &Expr, name: &str) -> Self::Output;
    fn visit_failed(&mut self, expr: &Expr, text: &str, reason: &str) -> Self::Output;
}

pub trait Rewriter {
    /// 数值、字符串、布尔、日期常量
    fn rewrite_constant(&mut self, expr: &Expr) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn rewrite_variable(&mut self, expr: &Expr, _variable: &Variable) -> Result<Expr> {
        Ok(expr.clone())
    }

    fn rewrite_negate(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        walk_negate(self, expr, operand)
    }

    fn rewrite_not(&mut self, expr: &Expr, operand: &Expr) -> Result<Expr> {
        walk_not(self, expr, operand)
    }

    fn rewrite_binary(
        &mut self,
        expr: &Expr,
        op: BinaryOperator,
        left: &Expr,
        right: &Expr,
    ) -> Result<Expr> {
        walk_binary(self, expr, op, left, right)
    }

    fn rewrite_if(
        &mut self,
        expr: &Expr,
        condition: &Expr,
        then: &Expr,
        otherwise: &Expr,
    ) -> Result<Expr> {
        walk_if(self, expr, condition, then, otherwise)
    }

    fn rewrite_set(&mut self, expr: &Expr, items: &[Expr]) -> Result<Expr> {
        walk_set(self, expr, items)
    }

    fn rewrite_call(&mut self, expr: &Expr, name: &str, args: &[Expr]) -> Result<Expr> {
        walk_call(self, expr, name, args)
    }

    fn rewrite_property(&mut self, expr: &Expr, target: &Expr, name: &str) -> Result<Expr> {
        walk_property(self, expr, target, name)
    }

    fn rewrite_failed(&mut self, expr: &Expr) -> Result<Expr> {
        Ok(expr.clone())
    }
}

fn rebuilt(expr: &Expr, kind: ExprKind) -> Expr {
    Expr {
        kind,
        unit: expr.unit.clone(),
    }
}

pub fn walk_negate<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    operand: &Expr,
) -> Result<Expr> {
    let operand = operand.rewrite(rewriter)?;
    Ok(rebuilt(expr, ExprKind::Negate(Box::new(operand))))
}

pub fn walk_not<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    operand: &Expr,
) -> Result<Expr> {
    let operand = operand.rewrite(rewriter)?;
    Ok(rebuilt(expr, ExprKind::Not(Box::new(operand))))
}

pub fn walk_binary<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    op: BinaryOperator,
    left: &Expr,
    right: &Expr,
) -> Result<Expr> {
    let left = left.rewrite(rewriter)?;
    let right = right.rewrite(rewriter)?;
    Ok(rebuilt(
        expr,
        ExprKind::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        },
    ))
}

pub fn walk_if<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    condition: &Expr,
    then: &Expr,
    otherwise: &Expr,
) -> Result<Expr> {
    let condition = condition.rewrite(rewriter)?;
    let then = then.rewrite(rewriter)?;
    let otherwise = otherwise.rewrite(rewriter)?;
    Ok(rebuilt(
        expr,
        ExprKind::If {
            condition: Box::new(condition),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        },
    ))
}

pub fn walk_set<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    items: &[Expr],
) -> Result<Expr> {
    let items = items
        .iter()
        .map(|item| item.rewrite(rewriter))
        .collect::<Result<Vec<_>>>()?;
    Ok(rebuilt(expr, ExprKind::Set(items)))
}

pub fn walk_call<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    name: &str,
    args: &[Expr],
) -> Result<Expr> {
    let args = args
        .iter()
        .map(|arg| arg.rewrite(rewriter))
        .collect::<Result<Vec<_>>>()?;
    Ok(rebuilt(
        expr,
        ExprKind::Call {
            name: name.to_string(),
            args,
        },
    ))
}

pub fn walk_property<R: Rewriter + ?Sized>(
    rewriter: &mut R,
    expr: &Expr,
    target: &Expr,
    name: &str,
) -> Result<Expr> {
    let target = target.rewrite(rewriter)?;
    Ok(rebuilt(
        expr,
        ExprKind::Property {
            target: Box::new(target),
            name: name.to_string(),
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::units::Unit;

    /// 把所有变量改名的改写器，只覆盖变量变体
    struct Rename;

    impl Rewriter for Rename {
        fn rewrite_variable(&mut self, expr: &Expr, variable: &Variable) -> Result<Expr> {
            Ok(Expr {
                kind: ExprKind::Variable(Variable::new(format!("{}_1", variable.name))),
                unit: expr.unit.clone(),
            })
        }
    }

    /// 统计节点数的访问者
    struct Count;

    impl Visitor for Count {
        type Output = usize;

        fn visit_number(&mut self, _: &Expr, _: f64) -> usize {
            1
        }
        fn visit_string(&mut self, _: &Expr, _: &str) -> usize {
            1
        }
        fn visit_bool(&mut self, _: &Expr, _: bool) -> usize {
            1
        }
        fn visit_date(&mut self, _: &Expr, _: &DateTime<Utc>) -> usize {
            1
        }
        fn visit_variable(&mut self, _: &Expr, _: &Variable) -> usize {
            1
        }
        fn visit_negate(&mut self, _: &Expr, operand: &Expr) -> usize {
            1 + operand.accept(self)
        }
        fn visit_not(&mut self, _: &Expr, operand: &Expr) -> usize {
            1 + operand.accept(self)
        }
        fn visit_binary(&mut self, _: &Expr, _: BinaryOperator, l: &Expr, r: &Expr) -> usize {
            1 + l.accept(self) + r.accept(self)
        }
        fn visit_if(&mut self, _: &Expr, c: &Expr, t: &Expr, o: &Expr) -> usize {
            1 + c.accept(self) + t.accept(self) + o.accept(self)
        }
        fn visit_set(&mut self, _: &Expr, items: &[Expr]) -> usize {
            1 + items.iter().map(|i| i.accept(self)).sum::<usize>()
        }
        fn visit_call(&mut self, _: &Expr, _: &str, args: &[Expr]) -> usize {
            1 + args.iter().map(|a| a.accept(self)).sum::<usize>()
        }
        fn visit_property(&mut self, _: &Expr, target: &Expr, _: &str) -> usize {
            1 + target.accept(self)
        }
        fn visit_failed(&mut self, _: &Expr, _: &str, _: &str) -> usize {
            1
        }
    }

    #[test]
    fn test_default_rewrite_rebuilds_and_keeps_units() {
        let original = Expr::add(Expr::variable("a"), Expr::variable("b")).with_unit(Unit::get("h"));
        let renamed = original.rewrite(&mut Rename).unwrap();

        assert_eq!(
            renamed,
            Expr::add(Expr::variable("a_1"), Expr::variable("b_1")).with_unit(Unit::get("h"))
        );
        // 输入树不变
        assert!(original.references("a"));
    }

    #[test]
    fn test_accept_dispatches_every_variant() {
        let expr = Expr::if_then_else(
            Expr::not(Expr::boolean(true)),
            Expr::set(vec![Expr::number(1.0), Expr::string("x")]),
            Expr::property(Expr::call("F", vec![Expr::negate(Expr::variable("a"))]), "Hour"),
        );
        assert_eq!(expr.accept(&mut Count), 10);
    }
}
