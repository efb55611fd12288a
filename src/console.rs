//! 交互控制台抽象
//!
//! 核心只请求有限的几类结构化输入（枚举选择、整数、自由文本、是/否），
//! 文案渲染完全由实现负责。测试中用脚本化实现替换。

use anyhow::Result;
use std::io::{self, Write};

/// 控制台协作者接口
pub trait Console {
    /// 从枚举选项中选一个，返回下标；空输入使用默认项
    fn choose(&self, prompt: &str, options: &[String], default: usize) -> Result<usize>;

    /// 读取一个非负整数；空输入返回 None
    fn read_int(&self, prompt: &str) -> Result<Option<u32>>;

    /// 读取一行自由文本（已去除首尾空白）
    fn read_line(&self, prompt: &str) -> Result<String>;

    /// 是/否确认；空输入使用默认值
    fn confirm(&self, prompt: &str, default: bool) -> Result<bool>;

    /// 向用户展示一行信息
    fn say(&self, msg: &str);
}

/// 标准输入/输出实现
pub struct StdinConsole;

impl StdinConsole {
    fn prompt_line(&self, prompt: &str) -> Result<String> {
        print!("{}", prompt);
        io::stdout().flush()?;

        let mut line = String::new();
        io::stdin().read_line(&mut line)?;
        Ok(line.trim().to_string())
    }
}

impl Console for StdinConsole {
    fn choose(&self, prompt: &str, options: &[String], default: usize) -> Result<usize> {
        println!("{}", prompt);
        for (idx, option) in options.iter().enumerate() {
            println!("  [{}] {}", idx + 1, option);
        }
        println!();

        // 非法输入让用户重试，而不是中止向导
        loop {
            let input =
                self.prompt_line(&format!("👉 [1-{}] (Enter={}): ", options.len(), default + 1))?;
            if input.is_empty() {
                return Ok(default);
            }
            match input.parse::<usize>() {
                Ok(n) if n >= 1 && n <= options.len() => return Ok(n - 1),
                _ => println!("❌ 无效选择，请重新输入。"),
            }
        }
    }

    fn read_int(&self, prompt: &str) -> Result<Option<u32>> {
        loop {
            let input = self.prompt_line(prompt)?;
            if input.is_empty() {
                return Ok(None);
            }
            match input.parse::<u32>() {
                Ok(n) => return Ok(Some(n)),
                Err(_) => println!("❌ 必须是数字。"),
            }
        }
    }

    fn read_line(&self, prompt: &str) -> Result<String> {
        self.prompt_line(prompt)
    }

    fn confirm(&self, prompt: &str, default: bool) -> Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let input = self.prompt_line(&format!("{} {} : ", prompt, hint))?;
        if input.is_empty() {
            return Ok(default);
        }
        Ok(input.to_lowercase().starts_with('y'))
    }

    fn say(&self, msg: &str) {
        println!("{}", msg);
    }
}

#[cfg(test)]
pub mod testing {
    //! 测试用的脚本化控制台

    use super::*;
    use std::sync::Mutex;

    /// 按脚本回答的控制台实现
    pub struct ScriptedConsole {
        answers: Mutex<Vec<String>>,
    }

    impl ScriptedConsole {
        pub fn new(answers: Vec<&str>) -> Self {
            let mut answers: Vec<String> = answers.into_iter().map(String::from).collect();
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
            }
        }

        fn next(&self) -> String {
            self.answers.lock().unwrap().pop().unwrap_or_default()
        }
    }

    impl Console for ScriptedConsole {
        fn choose(&self, _prompt: &str, options: &[String], default: usize) -> Result<usize> {
            let input = self.next();
            if input.is_empty() {
                return Ok(default);
            }
            let n: usize = input.parse()?;
            anyhow::ensure!(n >= 1 && n <= options.len(), "choice out of range");
            Ok(n - 1)
        }

        fn read_int(&self, _prompt: &str) -> Result<Option<u32>> {
            let input = self.next();
            if input.is_empty() {
                return Ok(None);
            }
            Ok(Some(input.parse()?))
        }

        fn read_line(&self, _prompt: &str) -> Result<String> {
            Ok(self.next())
        }

        fn confirm(&self, _prompt: &str, default: bool) -> Result<bool> {
            let input = self.next();
            if input.is_empty() {
                return Ok(default);
            }
            Ok(input.to_lowercase().starts_with('y'))
        }

        fn say(&self, _msg: &str) {}
    }
}
