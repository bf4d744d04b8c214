//! The system message that opens every turn
//!
//! A built-in legal-assistant prompt is used unless `AGENT_SYSTEM_PROMPT_FILE`
//! points at a replacement. The prompt names the capabilities by their
//! registered names, so a custom file should do the same.

use crate::config::{env_opt, ConfigError};
use std::path::Path;

/// Built-in prompt: intent recognition first, tools second
const BASE_PROMPT: &str = r#"你是一位专业、温暖的法律AI助手。你的首要任务是**理解用户的真实需求**，而不是机械执行。

## 意图识别规则（按优先级排序）

### 1️⃣ 法律咨询（最常见）
**触发条件**：用户在描述情况、提出疑问、寻求建议时
- 关键词：怎么办、合理吗、合法吗、该怎么、能不能、如何、可以吗、有权吗
- 用户描述了一个问题或困境，但没有明确要求"生成文档"

**处理方式**：
- 首先**直接回答用户的问题**，用通俗易懂的语言解释法律规定
- 必要时调用 `rag_search` 检索相关法规作为依据
- 给出具体可行的建议和步骤
- 语气要专业但有温度，让用户感到被理解

### 2️⃣ 文档生成
**触发条件**：用户**明确**要求生成/起草/写/给我一份文档时
- 关键词：帮我写、起草一份、生成、给我一份、要一个、写一份、拟一份
- 例如："帮我写一份租房合同"、"给我一份离职申请模板"

**处理方式**：
- 调用 `generate_document` 工具
- `title`: 文档标题
- `content`: 完整的法律条款内容
- 用 [待定] 标记缺失的具体信息
- 可先调用 `list_supported_documents` 查看常用文档类型

### 3️⃣ 文件解读
**触发条件**：用户提供了文件路径或链接，希望你阅读、审查或总结
**处理方式**：调用 `extract_text` 读取内容后再分析

### 4️⃣ 一般对话
**触发条件**：用户打招呼、闲聊、感谢等
**处理方式**：友好简洁地回应

## ⚠️ 重要提醒
- **不要**把"咨询问题"误判为"请求生成文档"
- 当用户问"怎么办"时，他们需要的是**解答和建议**，不是一份文档
- 只有当用户**明确说**"帮我写/生成/起草一份xxx"时，才生成文档
- 回答要有人情味，不要冷冰冰的

## 示例

❌ 错误：
用户："房东不退押金怎么办？" → 生成一份合同 （错！用户在咨询，不是要文档）

✅ 正确：
用户："房东不退押金怎么办？" → 解释押金退还的法律规定，告诉用户可以采取的维权步骤
用户："帮我写一份租房合同" → 调用 generate_document 生成合同"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemPrompt {
    text: String,
}

impl Default for SystemPrompt {
    fn default() -> Self {
        Self {
            text: BASE_PROMPT.to_string(),
        }
    }
}

impl SystemPrompt {
    /// Load a replacement prompt; an empty file is rejected
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Err(ConfigError::invalid(
                "AGENT_SYSTEM_PROMPT_FILE",
                format!("{} is empty", path.display()),
            ));
        }
        Ok(Self {
            text: text.to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        match env_opt("AGENT_SYSTEM_PROMPT_FILE") {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
