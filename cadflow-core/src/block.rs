use serde::{Deserialize, Serialize};

/// 通用的“属性 + 子块”文本树，实体与文档的保存/恢复都经由它完成。
///
/// 属性保持插入顺序，同名属性写入时原位替换。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TextBlock {
    name: String,
    attributes: Vec<(String, String)>,
    children: Vec<TextBlock>,
}

impl TextBlock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// 文件根节点没有名称。
    pub fn root() -> Self {
        Self::default()
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        let key = key.into();
        let value = value.to_string();
        match self.attributes.iter_mut().find(|(name, _)| *name == key) {
            Some((_, slot)) => *slot = value,
            None => self.attributes.push((key, value)),
        }
        self
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    #[inline]
    pub fn has_attribute(&self, key: &str) -> bool {
        self.attribute(key).is_some()
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    /// 追加一个空子块并返回其可变引用，便于链式填充。
    pub fn add_child(&mut self, name: impl Into<String>) -> &mut TextBlock {
        self.children.push(TextBlock::new(name));
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    pub fn push_child(&mut self, child: TextBlock) {
        self.children.push(child);
    }

    #[inline]
    pub fn children(&self) -> &[TextBlock] {
        &self.children
    }

    /// 第一个同名子块。
    pub fn find_child(&self, name: &str) -> Option<&TextBlock> {
        self.children.iter().find(|child| child.name == name)
    }
}
