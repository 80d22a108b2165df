//! Paraphrase templates
//!
//! Every variant is produced by substituting the operand display strings into a
//! fixed template, so all three wordings carry the same numbers.

use super::{conversion, Operand, Operation, ParaphraseSet, Problem, ResultKind};

struct Templates {
    direct: &'static str,
    contextualized: &'static [&'static str],
    variation: &'static str,
}

const ADDITION: Templates = Templates {
    direct: "計算 {a} + {b}",
    contextualized: &[
        "小明有 {a} 元，媽媽又給他 {b} 元，他現在有多少錢？",
        "一條路前段長 {a} 公尺，後段長 {b} 公尺，全長是多少公尺？",
        "水桶裡有 {a} 公升的水，又倒進 {b} 公升，現在有多少公升？",
    ],
    variation: "{a} 加上 {b} 等於多少？",
};

const SUBTRACTION: Templates = Templates {
    direct: "計算 {a} - {b}",
    contextualized: &[
        "書店有 {a} 本書，賣出了 {b} 本，還剩下幾本？",
        "水箱裝了 {a} 公升的水，用掉 {b} 公升，還剩多少公升？",
        "錢包裡有 {a} 元，花掉 {b} 元之後還剩多少元？",
    ],
    variation: "{a} 減去 {b} 是多少？",
};

const MULTIPLICATION: Templates = Templates {
    direct: "計算 {a} × {b}",
    contextualized: &[
        "每公斤蘋果 {a} 元，買 {b} 公斤要付多少錢？",
        "每張票 {a} 元，買 {b} 張總共要付多少元？",
    ],
    variation: "{a} 和 {b} 相乘的結果是什麼？",
};

const DIVISION: Templates = Templates {
    direct: "計算 {a} ÷ {b}",
    contextualized: &[
        "{a} 公尺長的繩子平均剪成 {b} 段，每段長多少公尺？",
        "總共 {a} 元要平均分給 {b} 個人，每個人分到多少元？",
    ],
    variation: "{a} 除以 {b} 等於多少？",
};

const PERCENT_OF: Templates = Templates {
    direct: "{a} 的 {b}% 是多少？",
    contextualized: &[
        "一筆 {a} 元的預算中有 {b}% 用於交通，交通費是多少元？",
        "一座果園收成 {a} 公斤水果，其中 {b}% 外銷，外銷多少公斤？",
    ],
    variation: "如果要從 {a} 中計算 {b}%，結果是多少？",
};

const DISCOUNT: Templates = Templates {
    direct: "{a} × {b}% 是多少？",
    contextualized: &[
        "一件原價 {a} 元的衣服降價 {b}%，折扣金額是多少元？",
        "商店對 {a} 元的商品提供 {b}% 折扣，可以省下多少元？",
    ],
    variation: "原價 {a} 元、折扣 {b}%，便宜了多少元？",
};

const INTEREST: Templates = Templates {
    direct: "{a} 的 {b}% 是多少？",
    contextualized: &[
        "把 {a} 元存入年利率 {b}% 的帳戶，一年後的利息是多少元？",
        "借款 {a} 元，年利率 {b}%，一年要付多少利息？",
    ],
    variation: "本金 {a} 元，利率 {b}%，一年利息為多少？",
};

const LENGTH: Templates = Templates {
    direct: "{a} {from} 等於多少{to}？",
    contextualized: &[
        "一條步道長 {a} {from}，換算成{to}是多少？",
        "一塊布長 {a} {from}，請問是多少{to}？",
    ],
    variation: "請把 {a} {from} 換算成{to}。",
};

const WEIGHT: Templates = Templates {
    direct: "{a} {from} 等於多少{to}？",
    contextualized: &[
        "一袋米重 {a} {from}，換算成{to}是多少？",
        "一個包裹重 {a} {from}，請問是多少{to}？",
    ],
    variation: "請把 {a} {from} 換算成{to}。",
};

const TIME: Templates = Templates {
    direct: "{a} {from} 等於多少{to}？",
    contextualized: &[
        "一段旅程花了 {a} {from}，換算成{to}是多少？",
        "一部電影連續播放 {a} {from}，等於多少{to}？",
    ],
    variation: "請把 {a} {from} 換算成{to}。",
};

const TEMPERATURE: Templates = Templates {
    direct: "{a} {from} 等於多少{to}？",
    contextualized: &[
        "今天氣溫是 {a} {from}，換算成{to}是多少？",
        "烤箱設定在 {a} {from}，換算成{to}是多少？",
    ],
    variation: "請把 {a} {from} 換算成{to}。",
};

const ORDERING: Templates = Templates {
    direct: "將下列數字由小到大排列：{items}",
    contextualized: &[
        "幾位同學分別喝掉 {items} 瓶果汁（以代號表示），請依喝的量由少到多排出代號順序。",
        "幾段繩子的長度分別是 {items} 公尺，請由短到長排出代號順序。",
    ],
    variation: "請比較 {items} 的大小，並由小到大排序。",
};

const MAXIMUM: Templates = Templates {
    direct: "下列各數中，最大的數值是多少：{items}？",
    contextualized: &[
        "幾塊蛋糕的重量分別是 {items} 公斤，最重的那塊是多少公斤？",
        "幾位選手的成績分別是 {items} 分，最高分是多少？",
    ],
    variation: "在 {items} 之中，最大的數值是多少？",
};

const ROUNDING_NOTE: &str = "（四捨五入到小數點後兩位）";

fn templates_for(operation: Operation) -> &'static Templates {
    match operation {
        Operation::Addition => &ADDITION,
        Operation::Subtraction => &SUBTRACTION,
        Operation::Multiplication => &MULTIPLICATION,
        Operation::Division => &DIVISION,
        Operation::PercentOf => &PERCENT_OF,
        Operation::Discount => &DISCOUNT,
        Operation::Interest => &INTEREST,
        Operation::LengthConversion => &LENGTH,
        Operation::WeightConversion => &WEIGHT,
        Operation::TimeConversion => &TIME,
        Operation::TemperatureConversion => &TEMPERATURE,
        Operation::Ordering => &ORDERING,
        Operation::Maximum => &MAXIMUM,
    }
}

/// Deterministic template pick so the same problem always gets the same story
fn bank_index(id: &str, len: usize) -> usize {
    let sum: usize = id.bytes().map(usize::from).sum();
    sum % len.max(1)
}

fn render(template: &str, operands: &[Operand]) -> String {
    let display = |i: usize| operands.get(i).map(Operand::display).unwrap_or_default();
    let items = operands
        .iter()
        .enumerate()
        .map(|(i, op)| format!("{}：{}", super::item_label(i), op.display()))
        .collect::<Vec<_>>()
        .join("、");
    let (from, to) = match (operands.get(1), operands.get(2)) {
        (Some(Operand::Unit(from)), Some(Operand::Unit(to))) => {
            (conversion::unit_name(from), conversion::unit_name(to))
        }
        _ => ("", ""),
    };

    template
        .replace("{a}", &display(0))
        .replace("{b}", &display(1))
        .replace("{from}", from)
        .replace("{to}", to)
        .replace("{items}", &items)
}

/// Produce the direct, contextualized and variation wordings of a problem
pub fn create_paraphrases(problem: &Problem) -> ParaphraseSet {
    let templates = templates_for(problem.operation);
    let contextualized =
        templates.contextualized[bank_index(&problem.id, templates.contextualized.len())];

    let mut set = ParaphraseSet {
        direct: render(templates.direct, &problem.operands),
        contextualized: render(contextualized, &problem.operands),
        variation: render(templates.variation, &problem.operands),
    };

    if let ResultKind::Rounded { .. } = problem.result_kind {
        set.direct.push_str(ROUNDING_NOTE);
        set.contextualized.push_str(ROUNDING_NOTE);
        set.variation.push_str(ROUNDING_NOTE);
    }

    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::DEFAULT_TOLERANCE;

    #[test]
    fn test_addition_paraphrases() {
        let p = Problem::build(
            "arith_001",
            Operation::Addition,
            vec![Operand::Number(234.0), Operand::Number(567.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(p.paraphrases.direct, "計算 234 + 567");
        assert_eq!(p.paraphrases.variation, "234 加上 567 等於多少？");
        assert!(p.paraphrases.contextualized.contains("234"));
        assert!(p.paraphrases.contextualized.contains("567"));
    }

    #[test]
    fn test_conversion_uses_unit_names() {
        let p = Problem::build(
            "conv_001",
            Operation::LengthConversion,
            vec![
                Operand::Number(12.5),
                Operand::Unit("km".into()),
                Operand::Unit("m".into()),
            ],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(p.paraphrases.direct, "12.5 公里 等於多少公尺？");
    }

    #[test]
    fn test_rounded_division_gets_note() {
        let p = Problem::build(
            "arith_009",
            Operation::Division,
            vec![Operand::Number(100.0), Operand::Number(7.0)],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        for (_, text) in p.paraphrases.iter() {
            assert!(text.ends_with(ROUNDING_NOTE));
        }
    }

    #[test]
    fn test_comparison_items_listed() {
        let p = Problem::build(
            "cmp_001",
            Operation::Maximum,
            vec![
                Operand::Fraction { numerator: 3, denominator: 4 },
                Operand::Number(0.7),
            ],
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert!(p.paraphrases.direct.contains("A：3/4、B：0.7"));
        for (_, text) in p.paraphrases.iter() {
            assert!(!text.contains('='), "{}", text);
        }
    }
}
