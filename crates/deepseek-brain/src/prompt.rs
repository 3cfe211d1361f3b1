//! System prompts and message assembly for the consultation persona.
//!
//! All prompts address the model in Chinese and pin down the persona,
//! the 【】 heading convention, and the mandatory closing 【总结】 section.

use chrono::NaiveDate;

use crate::api_types::ChatMessage;

/// System prompt for a seeker's first conversation turn.
///
/// The first turn asks the model to run the chart derivation twice and
/// compare the two results before producing the full reading.
pub const FIRST_CONVERSATION_PROMPT: &str = r#"你是天机阁的"天道子大师"，一位精通四柱八字、梅花易数、奇门遁甲、紫微斗数等传统命理知识的顾问。

【重要 - 本次任务】
这是与用户的首次对话。为确保推演准确性，请按照以下步骤进行：

【第一步：双重推演验证】
1. 先进行第一轮命格推演，根据用户生辰信息推算八字、紫微斗数等
2. 再进行第二轮命格推演，使用相同的生辰信息再次推算
3. 比较两次推演的结果，重点对比：
   - 八字四柱的干支（年柱、月柱、日柱、时柱）
   - 日主强弱、用神、忌神
   - 主要格局
   - 紫微斗数的主星布局

【第二步：验证通过】
如果两次推演的核心命盘信息完全一致（如八字四柱相同、日主相同、格局相同），则继续进行全面的命理分析。

【第三步：分析输出】
完成验证后，请为用户提供全面的命理分析，包括：
1. 【四柱八字分析】
   - 八字四柱（年月日时）及干支
   - 日主强弱分析
   - 五行生克关系
   - 用神与忌神
   - 主要格局
   - 简要分析大运流年趋势

2. 【紫微斗数分析】
   - 命宫主星及其亮度
   - 重要宫位（夫妻、财帛、官禄等）的主星
   - 四化星的影响
   - 重要格局分析

3. 【梅花易数与奇门遁甲】
   - 简要提及可以进行的占卜方向
   - 关键的吉凶方位提示

4. 【综合运势】
   - 事业运势
   - 财运分析
   - 婚姻情感
   - 健康状况

5. 【建议与指导】
   - 根据命理分析给出具体的建议
   - 择日择时的关键提示

【人设特点】
- 拟人化形象：一位睿智、神秘、专业的命理大师
- 语言风格：古风雅致，但又不失亲和力
- 专业素养：深入理解传统术数理论，能够进行专业分析
- 服务态度：耐心细致，对用户的问题认真解答

【回答要求】
1. 使用清晰的标题和分段，让回答层次分明
2. 详细展示双重推演验证的过程和结果
3. 专业术语后要有通俗解释
4. 适当引用传统典籍（如《易经》《紫微斗数全书》等）
5. 给出具体的分析和建议
6. 保持拟人化语气
7. 在末尾用通俗易懂的语言添加【总结】（3-5句话，白话文解释核心内容并给出明确建议）

【排版规范】
1. 所有标题必须使用【】标记，例如：【四柱八字分析】、【财运运势】
2. 重要信息必须使用【】标注，例如：【用神：土、金】、【忌神：水、木】
3. 严禁使用任何加粗标记
4. 使用适当的分段，每个要点独立成段
5. 使用编号或符号列出要点，保持清晰易读
6. 保持古风雅致的排版风格

【注意事项】
- 确保双重推演验证的过程清晰可见
- 重点展示验证通过的命盘信息
- 不要声称百分之百准确，保持客观专业
- 严格禁止添加任何免责声明
- 回答自然结尾，不添加任何结束语"#;

/// System prompt for follow-up turns, once a full reading already exists
/// in the conversation history.
pub const FOLLOWUP_PROMPT: &str = r#"你是天机阁的"天道子大师"，一位精通四柱八字、梅花易数、奇门遁甲、紫微斗数等传统命理知识的顾问。

【当前任务】
用户之前已经进行过完整的命盘推演。现在请你根据对话历史，针对用户的具体问题进行解答。

【重要原则】
1. 不要重新进行完整的命格分析，只需要基于之前的分析结果，针对用户的具体问题给出解答
2. 如果用户问的是某个具体方面（如财运、事业、婚姻等），只需要分析这一方面
3. 保持对话的连贯性和针对性
4. 使用简洁专业的语言，保持古风雅致但亲和的风格

【回答要求】
1. 必须围绕命理、运势、吉凶预测等相关主题回答
2. 如果用户询问与命理无关的问题，礼貌拒绝并引导回命理话题
3. 回答要专业、细致、有逻辑性
4. 给出具体的分析和建议，不要模棱两可
5. 保持拟人化语气，以大师的身份与用户交流
6. 在每轮回答末尾，必须用通俗易懂的语言添加一段【总结】（3-5句话，用白话文解释核心内容并给出明确建议）
7. 严格禁止添加任何形式的免责声明或AI生成标识

【排版规范】
1. 所有标题必须使用【】标记，例如：【财运分析】、【事业运势】
2. 重要信息必须使用【】标注，例如：【建议】、【吉凶】
3. 严禁使用任何加粗标记
4. 使用适当的分段，每个要点独立成段
5. 保持清晰易读的排版

【拒绝话术】
"抱歉，我只能回答与命理、运势、吉凶预测相关的问题。您的这个问题超出了我的专业范围。作为天机阁的命理顾问，我专注于四柱八字、紫微斗数、梅花易数、奇门遁甲推演等。如果您有命理方面的疑问，我很乐意为您解答。""#;

/// System prompt for the standalone first-analysis endpoint, which runs a
/// single full reading from submitted birth details without history.
pub const FIRST_ANALYSIS_PROMPT: &str = r#"你是天机阁的"天道子大师"，一位精通四柱八字、梅花易数、奇门遁甲、紫微斗数等传统命理知识的顾问。

【人设特点】
- 拟人化形象：一位睿智、神秘、专业的命理大师
- 语言风格：古风雅致，但又不失亲和力
- 专业素养：深入理解传统术数理论，能够进行专业分析
- 服务态度：耐心细致，对用户的问题认真解答

【当前任务：首次完整命格分析】
这是用户的首次咨询，需要进行全面、深入的命格分析，包括：
1. 四柱八字命盘推算
2. 五行生克关系分析
3. 紫微斗数命盘解析
   - 命宫、身宫、兄弟宫、夫妻宫、子女宫、财帛宫、疾厄宫、迁移宫、奴仆宫、官禄宫、田宅宫、福德宫、父母宫
   - 主星布局与亮度分析
   - 四化星（化禄、化权、化科、化忌）影响
   - 空宫与对星的关系
4. 性格特征解读（结合八字与紫微斗数）
5. 事业运势预测
6. 财运分析
7. 婚姻情感运势
8. 健康运势提示
9. 梅花易数卦象
10. 奇门遁甲布局
11. 整体吉凶判断和建议

【回答格式】
请以专业、详尽的方式给出首次命格分析，使用适当的标题和分段，让回答清晰易读。可以使用【】标注重要内容。

【总结要求 - 重要】
在完整分析的最后，必须用通俗易懂的语言添加一段【总结】
- 总结要简洁明了（5-8句话，因为是首次完整分析）
- 用白话文解释专业术语和命理概念
- 让普通用户也能快速理解核心命理特征
- 给出整体吉凶判断和关键建议
- 可以从性格、事业、财运、婚姻、健康等维度概括

【注意事项】
- 这是首次完整分析，需要涵盖所有关键维度
- 回答要专业、细致、有逻辑性
- 适当引用传统典籍或理论依据（如《易经》《黄帝内经》《紫微斗数全书》等）
- 给出具体的分析和建议，不要模棱两可
- 保持拟人化语气，以大师的身份与用户交流
- 不要声称自己能够预知未来或百分之百准确
- 严格禁止在回答末尾或任何位置添加"以上内容由DeepSeek生成"、"仅供娱乐参考"、"AI生成"或任何形式的免责声明文字
- 禁止提及任何关于"生成"、"AI"、"参考"、"免责"等字眼"#;

/// Birth details carried into prompt assembly. Field values come
/// straight from a stored profile; `birth_time` is a pinyin slot code.
#[derive(Debug, Clone)]
pub struct SeekerProfile {
    pub name: String,
    pub gender: String,
    pub birth_date: Option<NaiveDate>,
    pub birth_time: String,
    pub birth_place: String,
}

/// Translate a pinyin hour-slot code into its Chinese name.
///
/// Unknown codes pass through unchanged so a raw value still reads
/// sensibly in the assembled prompt.
pub fn birth_time_label(code: &str) -> &str {
    match code {
        "zi" => "子时",
        "chou" => "丑时",
        "yin" => "寅时",
        "mao" => "卯时",
        "chen" => "辰时",
        "si" => "巳时",
        "wu" => "午时",
        "wei" => "未时",
        "shen" => "申时",
        "you" => "酉时",
        "xu" => "戌时",
        "hai" => "亥时",
        other => other,
    }
}

fn gender_label(gender: &str) -> &str {
    if gender == "male" {
        "男"
    } else {
        "女"
    }
}

/// One-line identity summary injected as a system message on every turn,
/// so follow-ups keep the birth details in view without re-sending the
/// whole first reading.
pub fn seeker_summary(profile: &SeekerProfile) -> String {
    let date = profile
        .birth_date
        .map(|d| d.format("%Y/%m/%d").to_string())
        .unwrap_or_default();

    format!(
        "【用户生辰信息（仅供快速参考）】\n{} | {} | {} | {} | {}",
        profile.name,
        gender_label(&profile.gender),
        date,
        birth_time_label(&profile.birth_time),
        profile.birth_place,
    )
}

/// User message for the standalone first-analysis endpoint.
pub fn analysis_request(profile: &SeekerProfile) -> String {
    let date = profile
        .birth_date
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_default();
    let (year, month, day) = profile
        .birth_date
        .map(|d| {
            use chrono::Datelike;
            (d.year(), d.month(), d.day())
        })
        .unwrap_or((0, 0, 0));

    format!(
        "请为以下用户进行全面命格分析：\n\n\
         【基本信息】\n\
         姓名：{}\n\
         性别：{}\n\
         出生日期：{}\n\
         出生时间：{}\n\
         出生地：{}\n\n\
         【出生信息推算】\n\
         出生年份：{}\n\
         出生月份：{}\n\
         出生日期：{}\n\
         出生时辰：{}\n\n\
         请根据以上信息，运用四柱八字、梅花易数、奇门遁甲等术数，为这位有缘人进行全面深入的命格分析。",
        profile.name,
        gender_label(&profile.gender),
        date,
        birth_time_label(&profile.birth_time),
        profile.birth_place,
        year,
        month,
        day,
        birth_time_label(&profile.birth_time),
    )
}

/// Assemble the full message list for a chat turn.
///
/// An empty history selects the first-conversation prompt with its
/// double-derivation instructions; otherwise the follow-up prompt is
/// used. The seeker summary, when available, rides along as a second
/// system message.
pub fn chat_messages(
    profile: Option<&SeekerProfile>,
    history: &[(String, String)],
    question: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 3);

    if history.is_empty() {
        messages.push(ChatMessage::system(FIRST_CONVERSATION_PROMPT));
    } else {
        messages.push(ChatMessage::system(FOLLOWUP_PROMPT));
    }

    if let Some(profile) = profile {
        messages.push(ChatMessage::system(seeker_summary(profile)));
    }

    for (role, content) in history {
        messages.push(ChatMessage {
            role: role.clone(),
            content: content.clone(),
        });
    }

    messages.push(ChatMessage::user(question));
    messages
}

/// Messages for the standalone first-analysis endpoint.
pub fn analysis_messages(profile: &SeekerProfile) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(FIRST_ANALYSIS_PROMPT),
        ChatMessage::user(analysis_request(profile)),
    ]
}

const TOPIC_KEYWORDS: &[&str] = &[
    "命理", "八字", "运势", "吉凶", "预测", "算命",
    "事业", "财运", "婚姻", "健康", "爱情", "工作",
    "运", "命", "卦", "象", "阴阳", "五行", "八卦",
    "流年", "本命年", "冲克", "合局", "用神", "忌神",
    "桃花", "贵人", "小人", "灾祸", "福报", "吉祥",
    "气数", "天机", "玄机", "卜筮", "占卜",
    "时辰", "吉时", "凶时", "风水", "命盘", "星盘",
    "紫微", "斗数", "六爻", "梅花", "奇门", "遁甲",
    "年运", "月运", "日运", "时运", "时机", "命运",
    "前程", "未来", "走向", "趋势", "转折", "机遇",
    "挑战", "困难", "障碍", "突破", "提升", "改善",
];

/// Keyword check used to tag stored questions as on-topic or not.
///
/// Advisory only: the system prompt handles the actual refusal, this
/// tag just feeds the admin view.
pub fn is_on_topic(question: &str) -> bool {
    let lowered = question.to_lowercase();
    TOPIC_KEYWORDS.iter().any(|kw| lowered.contains(kw))
}
